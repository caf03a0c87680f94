//! Component descriptors and the ordered registry holding them.

mod builtin;
pub mod workload;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use platform_models::{Availability, OverrideList, PlatformSpec};

use crate::error::OperatorError;
use crate::k8s::KubeClient;

pub use builtin::{ModuleComponent, builtin_components};
pub use workload::{Workload, WorkloadKind};

/// Another component's Module whose readiness re-triggers this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchDescriptor {
    pub module: String,
}

#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// Namespace the component is installed into.
    fn namespace(&self) -> &str;

    /// Key of the component under `spec.components`.
    fn json_name(&self) -> &str;

    /// Must depend only on the effective spec.
    fn is_enabled(&self, effective: &PlatformSpec) -> bool;

    fn should_use_module(&self) -> bool;

    fn dependencies(&self) -> &[&'static str];

    fn overrides(&self, effective: &PlatformSpec) -> OverrideList {
        effective
            .component(self.json_name())
            .map(|c| c.override_list())
            .unwrap_or(OverrideList::Current(Vec::new()))
    }

    fn watch_descriptors(&self) -> Vec<WatchDescriptor> {
        self.dependencies()
            .iter()
            .map(|d| WatchDescriptor {
                module: d.to_string(),
            })
            .collect()
    }

    async fn is_installed(
        &self,
        client: &dyn KubeClient,
    ) -> Result<bool, OperatorError>;

    async fn is_ready(&self, client: &dyn KubeClient) -> bool;

    /// Availability with a human readable reason.
    async fn is_available(
        &self,
        client: &dyn KubeClient,
    ) -> (String, Availability);
}

/// Components in declaration order.
#[derive(Clone)]
pub struct Registry {
    components: Vec<Arc<dyn Component>>,
}

impl Registry {
    /// Rejects duplicate names and dependencies on unknown components.
    pub fn new(components: Vec<Arc<dyn Component>>) -> Result<Self, OperatorError> {
        let mut names = HashSet::new();
        for c in &components {
            if !names.insert(c.name().to_string()) {
                return Err(OperatorError::Configuration(format!(
                    "component {} registered twice",
                    c.name()
                )));
            }
        }
        for c in &components {
            if let Some(dep) =
                c.dependencies().iter().find(|d| !names.contains(**d))
            {
                return Err(OperatorError::Configuration(format!(
                    "component {} depends on unknown component {dep}",
                    c.name()
                )));
            }
        }
        Ok(Self { components })
    }

    pub fn builtin() -> Result<Self, OperatorError> {
        Self::new(builtin_components())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Component>> {
        self.components.iter()
    }

    pub fn module_components(&self) -> impl Iterator<Item = &Arc<dyn Component>> {
        self.components.iter().filter(|c| c.should_use_module())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Component>> {
        self.components.iter().find(|c| c.name() == name)
    }

    /// Whether the named component is enabled; unknown names are not.
    pub fn is_enabled(&self, name: &str, effective: &PlatformSpec) -> bool {
        self.get(name).is_some_and(|c| c.is_enabled(effective))
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
