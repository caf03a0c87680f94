//! Module records: one per enabled module-using component.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use kube::api::ObjectMeta;
use platform_models::{
    Catalog, ComponentState, ComponentStatusDetails, MODULE_OWNER_LABEL, Module,
    ModuleSpec, OWNER_NAME_ANNOTATION, OWNER_NAMESPACE_ANNOTATION, OWNER_UID_LABEL,
    Platform, PlatformSpec,
};
use tracing::{debug, error, info, warn};

use super::overrides::{WatchedNames, propagate, watched_keys};
use crate::error::{ErrorKind, OperatorError};
use crate::k8s::{self, KubeClient, OperationResult};
use crate::registry::{Component, Registry};
use crate::result::{Backoff, ReconcileResult};

/// Comma separated names of the modules whose readiness re-triggers this one.
pub const WATCH_MODULES_ANNOTATION: &str = "platform.dev/watch-modules";

pub struct ModuleManager {
    client: Arc<dyn KubeClient>,
    registry: Arc<Registry>,
    catalog: Arc<Catalog>,
    install_namespace: String,
    watched: Arc<WatchedNames>,
    backoff: Backoff,
}

fn log_failure(component: &str, err: &OperatorError) {
    match err.kind() {
        ErrorKind::Conflict => debug!(%component, error = %err, "conflict, retrying"),
        ErrorKind::Configuration => warn!(%component, error = %err, "configuration problem"),
        _ => error!(%component, error = %err, "module operation failed"),
    }
}

fn owner_of(platform: &Platform) -> (String, String) {
    (platform.namespace().unwrap_or_default(), platform.name_any())
}

impl ModuleManager {
    pub fn new(
        client: Arc<dyn KubeClient>,
        registry: Arc<Registry>,
        catalog: Arc<Catalog>,
        install_namespace: impl Into<String>,
        watched: Arc<WatchedNames>,
        backoff: Backoff,
    ) -> Self {
        Self {
            client,
            registry,
            catalog,
            install_namespace: install_namespace.into(),
            watched,
            backoff,
        }
    }

    pub fn install_namespace(&self) -> &str {
        &self.install_namespace
    }

    fn failed(&self, component: &str, err: OperatorError) -> ReconcileResult {
        log_failure(component, &err);
        if err.is_conflict() {
            return self.backoff.short();
        }
        ReconcileResult::from_error(err, &self.backoff)
    }

    /// Upserts the Module of every enabled module-using component. Returns
    /// the merged result and whether anything in the cluster changed.
    pub async fn create_or_update_modules(
        &self,
        actual: &Platform,
        effective: &PlatformSpec,
    ) -> (ReconcileResult, bool) {
        let mut result = ReconcileResult::done();
        let mut changed = false;
        for comp in self.registry.module_components() {
            if !comp.is_enabled(effective) {
                continue;
            }
            match self.upsert(comp.as_ref(), actual, effective).await {
                Ok(c) => changed |= c,
                Err(e) => result = result.merge(self.failed(comp.name(), e)),
            }
        }

        let owner = owner_of(actual);
        self.watched
            .replace(&owner, watched_keys(&self.registry, effective, &owner.0));
        (result, changed)
    }

    async fn upsert(
        &self,
        comp: &dyn Component,
        actual: &Platform,
        effective: &PlatformSpec,
    ) -> Result<bool, OperatorError> {
        let version = self
            .catalog
            .version_of(comp.name())
            .ok_or_else(|| OperatorError::MissingCatalogVersion(comp.name().to_string()))?
            .to_string();
        let client = self.client.as_ref();
        let (owner_ns, owner_name) = owner_of(actual);

        let mut changed =
            k8s::ensure_namespace(client, comp.namespace(), &[]).await?
                != OperationResult::Unchanged;
        let propagated = propagate(
            client,
            comp.name(),
            &owner_ns,
            comp.namespace(),
            comp.overrides(effective).into_sources(),
        )
        .await?;
        changed |= propagated.changed;

        let watches = comp
            .watch_descriptors()
            .into_iter()
            .map(|w| w.module)
            .collect::<Vec<_>>()
            .join(",");
        let uid = actual.uid().unwrap_or_default();
        let spec = ModuleSpec {
            module_name: comp.name().to_string(),
            target_namespace: comp.namespace().to_string(),
            version,
            values: propagated.values,
            values_from: propagated.values_from,
        };
        let module = Module {
            metadata: ObjectMeta {
                name: Some(comp.name().to_string()),
                namespace: Some(self.install_namespace.clone()),
                ..Default::default()
            },
            spec: spec.clone(),
            status: None,
        };
        let op = k8s::create_or_update(client, module, move |m| {
            let annotations = m.metadata.annotations.get_or_insert_with(Default::default);
            annotations.insert(OWNER_NAME_ANNOTATION.into(), owner_name);
            annotations.insert(OWNER_NAMESPACE_ANNOTATION.into(), owner_ns);
            if watches.is_empty() {
                annotations.remove(WATCH_MODULES_ANNOTATION);
            } else {
                annotations.insert(WATCH_MODULES_ANNOTATION.into(), watches);
            }
            m.metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert(OWNER_UID_LABEL.into(), uid);
            m.spec = spec;
        })
        .await?;
        if op != OperationResult::Unchanged {
            info!(module = %comp.name(), ?op, "module written");
        }
        Ok(changed || op != OperationResult::Unchanged)
    }

    /// Deletes the Modules of disabled components, or of every module-using
    /// component when `full` is set. Requeues until each one is verifiably
    /// gone.
    pub async fn delete_modules(
        &self,
        actual: &Platform,
        effective: &PlatformSpec,
        full: bool,
    ) -> ReconcileResult {
        let mut result = ReconcileResult::done();
        let mut module_count = 0;
        let mut deleted_count = 0;
        for comp in self.registry.module_components() {
            if !full && comp.is_enabled(effective) {
                continue;
            }
            module_count += 1;
            match self.delete_one(comp.as_ref()).await {
                Ok(true) => deleted_count += 1,
                Ok(false) => debug!(module = %comp.name(), "module still terminating"),
                Err(e) => result = result.merge(self.failed(comp.name(), e)),
            }
        }

        if full {
            self.watched.remove_owner(&owner_of(actual));
        }
        if deleted_count < module_count {
            debug!(deleted_count, module_count, "waiting for modules to be deleted");
            return result.merge(self.backoff.short());
        }
        result
    }

    /// True when the module is gone once this returns.
    async fn delete_one(&self, comp: &dyn Component) -> Result<bool, OperatorError> {
        let client = self.client.as_ref();
        let selector = format!("{MODULE_OWNER_LABEL}={}", comp.name());
        let copies = k8s::delete_by_label::<Secret>(client, Some(comp.namespace()), &selector)
            .await?
            + k8s::delete_by_label::<ConfigMap>(client, Some(comp.namespace()), &selector)
                .await?;
        if copies > 0 {
            debug!(module = %comp.name(), copies, "override copies deleted");
        }

        let ns = Some(self.install_namespace.as_str());
        if k8s::get::<Module>(client, ns, comp.name()).await?.is_none() {
            return Ok(true);
        }
        k8s::delete::<Module>(client, ns, comp.name()).await?;
        info!(module = %comp.name(), "module deleted");
        Ok(k8s::get::<Module>(client, ns, comp.name()).await?.is_none())
    }

    /// Every enabled component's Module converged and no disabled
    /// component's Module remains.
    pub async fn are_modules_done_reconciling(
        &self,
        effective: &PlatformSpec,
    ) -> Result<bool, OperatorError> {
        let ns = Some(self.install_namespace.as_str());
        for comp in self.registry.module_components() {
            let module = k8s::get::<Module>(self.client.as_ref(), ns, comp.name()).await?;
            let done = match (comp.is_enabled(effective), module) {
                (false, None) => true,
                (false, Some(_)) | (true, None) => false,
                (true, Some(m)) => m.is_converged(),
            };
            if !done {
                debug!(module = %comp.name(), "module not done reconciling");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Component status entries derived from the current Module records.
    pub async fn component_statuses(
        &self,
        actual: &Platform,
        effective: &PlatformSpec,
    ) -> Result<BTreeMap<String, ComponentStatusDetails>, OperatorError> {
        let generation = actual.metadata.generation.unwrap_or(0);
        let ns = Some(self.install_namespace.as_str());
        let mut out = BTreeMap::new();
        for comp in self.registry.module_components() {
            let mut details = actual
                .status
                .as_ref()
                .and_then(|s| s.components.get(comp.name()))
                .cloned()
                .unwrap_or_else(|| ComponentStatusDetails {
                    name: comp.name().to_string(),
                    ..Default::default()
                });
            // left to the health checker, see UpdateEvent::apply
            details.available = None;
            let module = k8s::get::<Module>(self.client.as_ref(), ns, comp.name()).await?;
            match (comp.is_enabled(effective), module) {
                (true, Some(m)) if m.is_converged() => {
                    details.state = ComponentState::Ready;
                    details.version = Some(m.spec.version.clone());
                    details.last_reconciled_generation = generation;
                }
                (true, Some(_)) => {
                    details.state = match details.state {
                        ComponentState::Disabled
                        | ComponentState::Uninstalled
                        | ComponentState::PreInstalling => ComponentState::Installing,
                        ComponentState::Installing => ComponentState::Installing,
                        _ => ComponentState::Reconciling,
                    };
                    details.reconciling_generation = generation;
                }
                (true, None) => details.state = ComponentState::PreInstalling,
                (false, Some(_)) => details.state = ComponentState::Uninstalling,
                (false, None) => {
                    if details.state != ComponentState::Disabled {
                        details.state = ComponentState::Disabled;
                        details.version = None;
                    }
                }
            }
            out.insert(comp.name().to_string(), details);
        }
        Ok(out)
    }
}
