//! Copies component overrides into module-owned Secrets and ConfigMaps.

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::ObjectMeta;
use platform_models::module::ValuesFromSource;
use platform_models::{KeyRef, MODULE_OWNER_LABEL, OverrideSource, PlatformSpec};
use serde_json::Value;
use tracing::debug;

use crate::effective::merge_json;
use crate::error::OperatorError;
use crate::k8s::{self, KubeClient, OperationResult};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverrideKind {
    Secret,
    ConfigMap,
}

/// An override resource whose changes should trigger a reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchedKey {
    pub kind: OverrideKind,
    pub namespace: String,
    pub name: String,
}

/// Namespace and name of a Platform.
pub type PlatformKey = (String, String);

/// Index from watched override resources to the Platform using them.
#[derive(Default)]
pub struct WatchedNames {
    index: scc::HashMap<WatchedKey, PlatformKey>,
}

impl WatchedNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces everything registered for `owner` with `keys`.
    pub fn replace(&self, owner: &PlatformKey, keys: impl IntoIterator<Item = WatchedKey>) {
        self.index.retain(|_, o| o != owner);
        for key in keys {
            self.index.upsert(key, owner.clone());
        }
    }

    pub fn remove_owner(&self, owner: &PlatformKey) {
        self.index.retain(|_, o| o != owner);
    }

    pub fn owner_of(
        &self,
        kind: OverrideKind,
        namespace: &str,
        name: &str,
    ) -> Option<PlatformKey> {
        let key = WatchedKey {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.index.read(&key, |_, owner| owner.clone())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Name of the copy of `original` owned by `module`.
pub fn copy_name(module: &str, original: &str) -> String {
    format!("{module}-{original}")
}

/// Override resources referenced by enabled module components.
pub fn watched_keys(
    registry: &Registry,
    effective: &PlatformSpec,
    namespace: &str,
) -> Vec<WatchedKey> {
    let mut keys = Vec::new();
    for comp in registry.module_components() {
        if !comp.is_enabled(effective) {
            continue;
        }
        for source in comp.overrides(effective).into_sources() {
            let kind = match &source {
                OverrideSource::Inline(_) => continue,
                OverrideSource::SecretRef(_) => OverrideKind::Secret,
                OverrideSource::ConfigMapRef(_) => OverrideKind::ConfigMap,
            };
            if let Some(name) = source.resource_name() {
                keys.push(WatchedKey {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
        }
    }
    keys
}

/// What a module's values end up as after propagation.
#[derive(Debug, Default, PartialEq)]
pub struct Propagated {
    pub values: Option<Value>,
    pub values_from: Vec<ValuesFromSource>,
    /// Whether any copy was created or modified.
    pub changed: bool,
}

/// Resolves `sources` for `module`: inline values are merged in list order,
/// referenced Secrets and ConfigMaps are read from `source_ns` and copied
/// into `target_ns`.
pub async fn propagate(
    client: &dyn KubeClient,
    module: &str,
    source_ns: &str,
    target_ns: &str,
    sources: Vec<OverrideSource>,
) -> Result<Propagated, OperatorError> {
    let mut out = Propagated::default();
    for source in sources {
        match source {
            OverrideSource::Inline(values) => {
                let merged = out
                    .values
                    .get_or_insert_with(|| Value::Object(Default::default()));
                merge_json(merged, &values);
            }
            OverrideSource::SecretRef(r) => {
                let Some(copied) =
                    copy_secret(client, module, source_ns, target_ns, &r).await?
                else {
                    continue;
                };
                out.changed |= copied.1 != OperationResult::Unchanged;
                out.values_from.push(ValuesFromSource {
                    secret_ref: Some(copied.0),
                    config_map_ref: None,
                });
            }
            OverrideSource::ConfigMapRef(r) => {
                let Some(copied) =
                    copy_config_map(client, module, source_ns, target_ns, &r).await?
                else {
                    continue;
                };
                out.changed |= copied.1 != OperationResult::Unchanged;
                out.values_from.push(ValuesFromSource {
                    config_map_ref: Some(copied.0),
                    secret_ref: None,
                });
            }
        }
    }
    Ok(out)
}

fn copy_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn missing(
    kind: &'static str,
    namespace: &str,
    r: &KeyRef,
) -> Result<Option<(KeyRef, OperationResult)>, OperatorError> {
    if r.optional.unwrap_or(false) {
        debug!(kind, name = %r.name, "optional override source missing");
        return Ok(None);
    }
    Err(OperatorError::MissingResource {
        kind,
        namespace: namespace.to_string(),
        name: r.name.clone(),
    })
}

async fn copy_secret(
    client: &dyn KubeClient,
    module: &str,
    source_ns: &str,
    target_ns: &str,
    r: &KeyRef,
) -> Result<Option<(KeyRef, OperationResult)>, OperatorError> {
    let Some(source) = k8s::get::<Secret>(client, Some(source_ns), &r.name).await?
    else {
        return missing("Secret", source_ns, r);
    };
    let Some(value) = source.data.as_ref().and_then(|d| d.get(&r.key)).cloned() else {
        if r.optional.unwrap_or(false) {
            return Ok(None);
        }
        return Err(OperatorError::Configuration(format!(
            "Secret {}/{} has no key {}",
            source_ns, r.name, r.key
        )));
    };

    let name = copy_name(module, &r.name);
    let copy = Secret {
        metadata: copy_meta(target_ns, &name),
        ..Default::default()
    };
    let key = r.key.clone();
    let owner = module.to_string();
    let op = k8s::create_or_update(client, copy, move |s| {
        s.data
            .get_or_insert_with(Default::default)
            .insert(key, value);
        s.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(MODULE_OWNER_LABEL.to_string(), owner);
    })
    .await?;
    debug!(%module, copy = %name, ?op, "override secret copied");
    Ok(Some((
        KeyRef {
            name,
            key: r.key.clone(),
            optional: r.optional,
        },
        op,
    )))
}

async fn copy_config_map(
    client: &dyn KubeClient,
    module: &str,
    source_ns: &str,
    target_ns: &str,
    r: &KeyRef,
) -> Result<Option<(KeyRef, OperationResult)>, OperatorError> {
    let Some(source) = k8s::get::<ConfigMap>(client, Some(source_ns), &r.name).await?
    else {
        return missing("ConfigMap", source_ns, r);
    };
    let Some(value) = source.data.as_ref().and_then(|d| d.get(&r.key)).cloned() else {
        if r.optional.unwrap_or(false) {
            return Ok(None);
        }
        return Err(OperatorError::Configuration(format!(
            "ConfigMap {}/{} has no key {}",
            source_ns, r.name, r.key
        )));
    };

    let name = copy_name(module, &r.name);
    let copy = ConfigMap {
        metadata: copy_meta(target_ns, &name),
        ..Default::default()
    };
    let key = r.key.clone();
    let owner = module.to_string();
    let op = k8s::create_or_update(client, copy, move |cm| {
        cm.data.get_or_insert_with(Default::default).insert(key, value);
        cm.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(MODULE_OWNER_LABEL.to_string(), owner);
    })
    .await?;
    debug!(%module, copy = %name, ?op, "override configmap copied");
    Ok(Some((
        KeyRef {
            name,
            key: r.key.clone(),
            optional: r.optional,
        },
        op,
    )))
}
