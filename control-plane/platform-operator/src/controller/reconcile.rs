//! One reconcile pass over a Platform: init, version gate, effective
//! configuration, then pre-work, modules and post-work in that order.

use kube::ResourceExt;
use platform_models::{
    Condition, ConditionType, Platform, PlatformSpec, PlatformState,
};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::ControllerContext;
use super::component_status::initialize_component_status;
use super::conditions::{
    append_condition, condition_to_state, new_condition, remove_conditions,
};
use super::instance::instance_info;
use super::postwork::post_work;
use super::prework::pre_work;
use super::uninstall::{FINALIZER, has_finalizer, reconcile_uninstall};
use crate::effective::effective_platform;
use crate::error::OperatorError;
use crate::k8s;
use crate::result::ReconcileResult;
use crate::status::UpdateEvent;
use crate::upgrade::is_upgrading;

fn current_conditions(actual: &Platform) -> Vec<Condition> {
    actual
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default()
}

/// Appends a condition to `conditions` and queues it, together with the
/// state it implies.
async fn push_condition(
    ctx: &ControllerContext,
    actual: &Platform,
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    message: &str,
) -> Result<(), OperatorError> {
    append_condition(conditions, new_condition(message, type_));
    let event = UpdateEvent::for_platform(actual)
        .with_state(condition_to_state(type_))
        .with_conditions(conditions.clone());
    ctx.updater.update(event).await
}

/// Records a single transition on top of the stored conditions.
pub(super) async fn transition(
    ctx: &ControllerContext,
    actual: &Platform,
    type_: ConditionType,
    message: &str,
) -> Result<(), OperatorError> {
    let mut conditions = current_conditions(actual);
    push_condition(ctx, actual, &mut conditions, type_, message).await
}

#[instrument(
    skip_all,
    fields(
        ns = %actual.namespace().unwrap_or_default(),
        name = %actual.name_any(),
    )
)]
pub async fn reconcile_platform(
    ctx: &ControllerContext,
    actual: &Platform,
) -> ReconcileResult {
    if let Err(e) = warn_if_not_singleton(ctx, actual).await {
        return ReconcileResult::from_error(e, &ctx.backoff);
    }

    let effective = match effective_platform(actual) {
        Ok(p) => p,
        // a bad profile must not block deletion
        Err(e) if actual.metadata.deletion_timestamp.is_some() => {
            warn!(error = %e, "uninstalling with the spec as written");
            actual.clone()
        }
        Err(e) => {
            warn!(error = %e, "unable to resolve the effective configuration");
            return ReconcileResult::from_error(e, &ctx.backoff);
        }
    };

    if actual.metadata.deletion_timestamp.is_some() {
        return reconcile_uninstall(ctx, actual, &effective.spec).await;
    }

    match init(ctx, actual, &effective.spec).await {
        Ok(false) => {}
        Ok(true) => return ReconcileResult::requeue_now(),
        Err(e) => return ReconcileResult::from_error(e, &ctx.backoff),
    }

    match check_gate(ctx, actual).await {
        Ok(true) => {}
        Ok(false) => return ReconcileResult::done(),
        Err(e) => return ReconcileResult::from_error(e, &ctx.backoff),
    }

    reconcile_install(ctx, actual, &effective.spec).await
}

async fn warn_if_not_singleton(
    ctx: &ControllerContext,
    actual: &Platform,
) -> Result<(), OperatorError> {
    let count = k8s::list::<Platform>(ctx.client.as_ref(), None, None)
        .await?
        .len();
    if count > 1 {
        let uid = actual.uid().unwrap_or_default();
        let generation = actual.metadata.generation.unwrap_or(0);
        if ctx.seen.first_time(&uid, generation, "singleton").await {
            warn!(count, "more than one Platform exists, only one supported");
        }
    }
    Ok(())
}

/// First-sight setup. Returns true when something was written, so the
/// caller starts over with a fresh copy.
async fn init(
    ctx: &ControllerContext,
    actual: &Platform,
    effective: &PlatformSpec,
) -> Result<bool, OperatorError> {
    let client = ctx.client.as_ref();
    // Direct status write guarded by the resource version we read, so it
    // has to happen before anything else bumps it. The updater would apply
    // it to a fresh copy and lose that guard, and the pass requeues right
    // after anyway.
    let mut wrote =
        initialize_component_status(client, &ctx.registry, actual, effective)
            .await?;

    if !has_finalizer(actual) {
        let mut finalizers = actual.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        let patch = json!({"metadata": {"finalizers": finalizers}});
        k8s::patch::<Platform>(
            client,
            actual.namespace().as_deref(),
            &actual.name_any(),
            &patch,
        )
        .await?;
        debug!("finalizer added");
        wrote = true;
    }

    let state = actual.status.as_ref().and_then(|s| s.state);
    if state.is_none() {
        let event =
            UpdateEvent::for_platform(actual).with_state(PlatformState::Ready);
        ctx.updater.update(event).await?;
        info!("initial state set");
        wrote = true;
    }
    Ok(wrote)
}

/// False when reconciling has to wait for the user to set a version.
async fn check_gate(
    ctx: &ControllerContext,
    actual: &Platform,
) -> Result<bool, OperatorError> {
    let status_version = actual
        .status
        .as_ref()
        .and_then(|s| s.version.as_deref())
        .unwrap_or("");
    if !actual.spec.version.trim().is_empty() {
        let requested = actual.spec.version.as_str();
        ctx.gate
            .validate_upgrade_request(requested, status_version, "")?;
        return Ok(true);
    }
    if !ctx.gate.is_upgrade_required(actual)? {
        return Ok(true);
    }

    let uid = actual.uid().unwrap_or_default();
    let generation = actual.metadata.generation.unwrap_or(0);
    if ctx.seen.first_time(&uid, generation, "upgrade-required").await {
        info!(
            installed = %status_version,
            bom = %ctx.gate.bom_version(),
            "upgrade required before reconciling modules"
        );
        let message = format!(
            "Upgrade required, set version field to v{} to upgrade",
            ctx.gate.bom_version()
        );
        transition(ctx, actual, ConditionType::UpgradePaused, &message).await?;
    }
    Ok(false)
}

async fn reconcile_install(
    ctx: &ControllerContext,
    actual: &Platform,
    effective: &PlatformSpec,
) -> ReconcileResult {
    let upgrading = is_upgrading(actual);
    let uid = actual.uid().unwrap_or_default();
    let generation = actual.metadata.generation.unwrap_or(0);
    let mut conditions = current_conditions(actual);

    if upgrading
        && ctx.seen.first_time(&uid, generation, "upgrade-started").await
    {
        let from = actual.status.as_ref().and_then(|s| s.version.clone());
        info!(?from, to = %actual.spec.version, "upgrade started");
        conditions = remove_conditions(
            &conditions,
            &[
                ConditionType::UpgradeComplete,
                ConditionType::UpgradeFailed,
                ConditionType::UpgradePaused,
            ],
        );
        let message = format!("Upgrading to version {}", actual.spec.version);
        if let Err(e) = push_condition(
            ctx,
            actual,
            &mut conditions,
            ConditionType::UpgradeStarted,
            &message,
        )
        .await
        {
            return ReconcileResult::from_error(e, &ctx.backoff);
        }
    }

    let pre = pre_work(ctx, effective).await;
    if !pre.is_complete() {
        debug!("pre-work incomplete");
        return pre;
    }

    let (applied, changed) =
        ctx.modules.create_or_update_modules(actual, effective).await;
    if changed
        && !upgrading
        && ctx.seen.first_time(&uid, generation, "install-started").await
    {
        conditions = remove_conditions(
            &conditions,
            &[ConditionType::InstallComplete, ConditionType::InstallFailed],
        );
        if let Err(e) = push_condition(
            ctx,
            actual,
            &mut conditions,
            ConditionType::InstallStarted,
            "Install in progress",
        )
        .await
        {
            return ReconcileResult::from_error(e, &ctx.backoff);
        }
    }
    let deleted = ctx.modules.delete_modules(actual, effective, false).await;
    let modules = applied.merge(deleted);

    let statuses = ctx.modules.component_statuses(actual, effective).await;
    let statuses = match statuses {
        Ok(s) => s,
        Err(e) => {
            return modules.merge(ReconcileResult::from_error(e, &ctx.backoff));
        }
    };
    if let Err(e) = ctx
        .updater
        .update(UpdateEvent::for_platform(actual).with_components(statuses))
        .await
    {
        return modules.merge(ReconcileResult::from_error(e, &ctx.backoff));
    }

    if !modules.is_complete() {
        return modules;
    }
    match ctx.modules.are_modules_done_reconciling(effective).await {
        Ok(true) => {}
        Ok(false) => {
            debug!("modules still converging");
            return ctx.backoff.short();
        }
        Err(e) => return ReconcileResult::from_error(e, &ctx.backoff),
    }

    let post = post_work(ctx, actual, effective, upgrading).await;
    if !post.is_complete() {
        debug!("post-work incomplete");
        return post;
    }

    if let Err(e) = complete(ctx, actual, conditions, upgrading).await {
        return ReconcileResult::from_error(e, &ctx.backoff);
    }
    ReconcileResult::done()
}

async fn complete(
    ctx: &ControllerContext,
    actual: &Platform,
    mut conditions: Vec<Condition>,
    upgrading: bool,
) -> Result<(), OperatorError> {
    let instance = instance_info(ctx.client.as_ref()).await?;
    let version = match actual.spec.version.trim() {
        "" => ctx.gate.bom_version().to_string(),
        v => v.to_string(),
    };
    let (type_, message) = if upgrading {
        (
            ConditionType::UpgradeComplete,
            format!("Upgrade to version {version} complete"),
        )
    } else {
        (ConditionType::InstallComplete, "Install complete".to_string())
    };
    if conditions.last().map(|c| c.type_) != Some(type_) {
        append_condition(&mut conditions, new_condition(message, type_));
        if upgrading {
            info!(%version, "upgrade complete");
        } else {
            info!(%version, "install complete");
        }
    }
    let event = UpdateEvent::for_platform(actual)
        .with_state(PlatformState::Ready)
        .with_conditions(conditions)
        .with_version(version)
        .with_instance(instance);
    ctx.updater.update(event).await
}
