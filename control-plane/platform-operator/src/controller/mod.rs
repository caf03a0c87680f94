pub mod component_status;
pub mod conditions;
pub mod instance;
pub mod modules;
pub mod overrides;
pub mod postwork;
pub mod prework;
pub mod reconcile;
mod reconcile_tests;
pub mod seen;
pub mod uninstall;

use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, ApiResource, DynamicObject, ObjectMeta};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, watcher::Config};
use kube::{Client, ResourceExt};
use platform_models::{
    Bom, Catalog, Module, OWNER_NAME_ANNOTATION, OWNER_NAMESPACE_ANNOTATION, Platform,
};
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::error::{ErrorKind, OperatorError};
use crate::k8s::{self, KubeClient};
use crate::registry::Registry;
use crate::result::{Backoff, Requeue};
use crate::status::StatusUpdater;
use crate::upgrade::UpgradeGate;
use modules::ModuleManager;
use overrides::{OverrideKind, WatchedNames};
use seen::SeenCache;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("{0}")]
    Failed(#[source] OperatorError, Requeue),
}

pub struct ControllerContext {
    pub client: Arc<dyn KubeClient>,
    pub registry: Arc<Registry>,
    pub bom: Arc<Bom>,
    pub gate: UpgradeGate,
    pub modules: ModuleManager,
    pub watched: Arc<WatchedNames>,
    pub updater: Arc<StatusUpdater>,
    pub seen: SeenCache,
    pub cfg: OperatorConfig,
    pub backoff: Backoff,
}

impl ControllerContext {
    pub fn new(
        client: Arc<dyn KubeClient>,
        registry: Arc<Registry>,
        bom: Arc<Bom>,
        catalog: Arc<Catalog>,
        updater: Arc<StatusUpdater>,
        cfg: OperatorConfig,
    ) -> Result<Self, OperatorError> {
        let gate = UpgradeGate::from_bom(&bom, cfg.version_check)?;
        let backoff = cfg.backoff();
        let watched = Arc::new(WatchedNames::new());
        let modules = ModuleManager::new(
            client.clone(),
            registry.clone(),
            catalog,
            cfg.install_namespace.clone(),
            watched.clone(),
            backoff,
        );
        Ok(Self {
            client,
            registry,
            bom,
            gate,
            modules,
            watched,
            updater,
            seen: SeenCache::new(),
            cfg,
            backoff,
        })
    }
}

fn platform_ref(ar: &ApiResource, ns: &str, name: &str) -> ObjectRef<DynamicObject> {
    ObjectRef::new_with(name, ar.clone()).within(ns)
}

/// Platform using the changed override resource, if any.
fn watched_owner(
    watched: &WatchedNames,
    ar: &ApiResource,
    kind: OverrideKind,
    meta: &ObjectMeta,
) -> Option<ObjectRef<DynamicObject>> {
    let (ns, name) = (meta.namespace.as_deref()?, meta.name.as_deref()?);
    let (owner_ns, owner_name) = watched.owner_of(kind, ns, name)?;
    debug!(?kind, %ns, %name, owner = %owner_name, "override changed");
    Some(platform_ref(ar, &owner_ns, &owner_name))
}

fn module_owner(ar: &ApiResource, module: &Module) -> Option<ObjectRef<DynamicObject>> {
    let annotations = module.metadata.annotations.as_ref()?;
    Some(platform_ref(
        ar,
        annotations.get(OWNER_NAMESPACE_ANNOTATION)?,
        annotations.get(OWNER_NAME_ANNOTATION)?,
    ))
}

pub async fn run_controller(client: Client, ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    let ar = k8s::api_resource::<Platform>();
    let api: Api<DynamicObject> = Api::all_with(client.clone(), &ar);

    let (secret_ar, secret_idx) = (ar.clone(), ctx.watched.clone());
    let (cm_ar, cm_idx) = (ar.clone(), ctx.watched.clone());
    let module_ar = ar.clone();

    info!(install_namespace = %ctx.cfg.install_namespace, "starting platform controller");
    Controller::new_with(api, Config::default(), ar)
        .watches(Api::<Secret>::all(client.clone()), Config::default(), move |s| {
            watched_owner(&secret_idx, &secret_ar, OverrideKind::Secret, &s.metadata)
        })
        .watches(Api::<ConfigMap>::all(client.clone()), Config::default(), move |c| {
            watched_owner(&cm_idx, &cm_ar, OverrideKind::ConfigMap, &c.metadata)
        })
        .watches(Api::<Module>::all(client), Config::default(), move |m| {
            module_owner(&module_ar, &m)
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    debug!(name = %obj_ref.name, ?action, "reconciled")
                }
                Err(e) => debug!(error = %e, "reconcile failed"),
            }
        })
        .await;

    info!("platform controller stopped");
    Ok(())
}

fn action_for(requeue: Requeue) -> Action {
    match requeue.jittered() {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

async fn reconcile(
    obj: Arc<DynamicObject>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let platform: Platform = match k8s::from_dynamic(obj.as_ref().clone()) {
        Ok(p) => p,
        Err(e) => {
            // retrying the same payload cannot succeed
            error!(name = %obj.name_any(), error = %e, "unable to decode platform");
            return Ok(Action::await_change());
        }
    };
    let (requeue, err) = reconcile::reconcile_platform(&ctx, &platform)
        .await
        .into_parts();
    match err {
        Some(e) => Err(ReconcileErr::Failed(e, requeue)),
        None => Ok(action_for(requeue)),
    }
}

fn error_policy(
    obj: Arc<DynamicObject>,
    error: &ReconcileErr,
    _ctx: Arc<ControllerContext>,
) -> Action {
    let ReconcileErr::Failed(e, requeue) = error;
    let name = obj.name_any();
    match e.kind() {
        ErrorKind::Conflict => debug!(%name, error = %e, "conflict"),
        ErrorKind::UserInput => warn!(%name, error = %e, "rejected, waiting for an edit"),
        ErrorKind::Configuration => warn!(%name, error = %e, "configuration error"),
        ErrorKind::Transient | ErrorKind::Fatal => error!(%name, error = %e, "reconcile error"),
    }
    action_for(*requeue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::labels;
    use platform_models::ModuleSpec;

    #[test]
    fn modules_map_back_to_owner() {
        let ar = k8s::api_resource::<Platform>();
        let mut m = Module::new("istio", ModuleSpec::default());
        assert!(module_owner(&ar, &m).is_none());
        m.metadata.annotations = Some(labels(&[
            (OWNER_NAME_ANNOTATION, "platform"),
            (OWNER_NAMESPACE_ANNOTATION, "default"),
        ]));
        let r = module_owner(&ar, &m).unwrap();
        assert_eq!(r.name, "platform");
        assert_eq!(r.namespace.as_deref(), Some("default"));
    }

    #[test]
    fn only_indexed_overrides_trigger() {
        let ar = k8s::api_resource::<Platform>();
        let watched = WatchedNames::new();
        let secret = crate::testutil::secret("default", "values", &[]);
        assert!(watched_owner(&watched, &ar, OverrideKind::Secret, &secret.metadata).is_none());

        watched.replace(
            &("default".into(), "platform".into()),
            [overrides::WatchedKey {
                kind: OverrideKind::Secret,
                namespace: "default".into(),
                name: "values".into(),
            }],
        );
        let r = watched_owner(&watched, &ar, OverrideKind::Secret, &secret.metadata).unwrap();
        assert_eq!(r.name, "platform");
        // same name, other kind
        let unrelated = Secret::default();
        assert!(watched_owner(&watched, &ar, OverrideKind::ConfigMap, &secret.metadata).is_none());
        assert!(watched_owner(&watched, &ar, OverrideKind::Secret, &unrelated.metadata).is_none());
    }

    #[test]
    fn requeue_translates_to_action() {
        assert_eq!(action_for(Requeue::Done), Action::await_change());
        assert_eq!(
            action_for(Requeue::Now),
            Action::requeue(std::time::Duration::ZERO)
        );
    }
}
