use kube::ResourceExt;
use platform_models::{ComponentState, ComponentStatusDetails, Platform, PlatformSpec};
use tracing::{debug, info};

use crate::error::OperatorError;
use crate::k8s::{self, KubeClient};
use crate::registry::Registry;

/// Status entries for components that have none yet, plus a generation for
/// entries that never recorded one. Empty when nothing needs writing.
pub async fn missing_component_statuses(
    client: &dyn KubeClient,
    registry: &Registry,
    actual: &Platform,
    effective: &PlatformSpec,
) -> Result<Vec<ComponentStatusDetails>, OperatorError> {
    let generation = actual.metadata.generation.unwrap_or(0);
    let existing = actual.status.as_ref().map(|s| &s.components);
    let mut out = Vec::new();
    for comp in registry.iter() {
        match existing.and_then(|c| c.get(comp.name())) {
            Some(details) if details.last_reconciled_generation == 0 => {
                out.push(ComponentStatusDetails {
                    last_reconciled_generation: generation,
                    ..details.clone()
                });
            }
            Some(_) => {}
            None => {
                let mut details = ComponentStatusDetails {
                    name: comp.name().to_string(),
                    state: ComponentState::Disabled,
                    ..Default::default()
                };
                if comp.is_enabled(effective) && comp.is_installed(client).await? {
                    details.state = ComponentState::Ready;
                    details.last_reconciled_generation = generation;
                }
                debug!(component = %comp.name(), state = ?details.state, "initial component status");
                out.push(details);
            }
        }
    }
    Ok(out)
}

/// Writes missing component status entries directly, guarded by the
/// Platform's resource version. Returns whether a write happened; the
/// caller requeues so the next pass sees the stored result.
pub async fn initialize_component_status(
    client: &dyn KubeClient,
    registry: &Registry,
    actual: &Platform,
    effective: &PlatformSpec,
) -> Result<bool, OperatorError> {
    let missing = missing_component_statuses(client, registry, actual, effective).await?;
    if missing.is_empty() {
        return Ok(false);
    }
    let mut updated = actual.clone();
    let status = updated.status.get_or_insert_with(Default::default);
    for details in missing {
        status.components.insert(details.name.clone(), details);
    }
    k8s::replace_status(client, &updated).await?;
    info!(name = %actual.name_any(), "component status initialized");
    Ok(true)
}
