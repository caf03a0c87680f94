use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::overrides::KeyRef;
use crate::platform::ConditionStatus;

/// Installation unit for one component, converged by the module controller.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "platform.modules.dev",
    version = "v1alpha1",
    kind = "Module",
    plural = "modules",
    namespaced,
    status = "ModuleStatus",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    pub module_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::preserve_unknown_fields")]
    pub values: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_from: Vec<ValuesFromSource>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValuesFromSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<KeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<KeyRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ModuleCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_version: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

pub const MODULE_READY_CONDITION: &str = "Ready";

impl ModuleStatus {
    pub fn ready_condition(&self) -> Option<&ModuleCondition> {
        self.conditions
            .iter()
            .find(|c| c.type_ == MODULE_READY_CONDITION)
    }
}

impl Module {
    /// True when the module controller finished the current generation at
    /// the requested version.
    pub fn is_converged(&self) -> bool {
        let Some(status) = &self.status else {
            return false;
        };
        let ready = status
            .ready_condition()
            .is_some_and(|c| c.status == ConditionStatus::True);
        ready
            && status.last_successful_generation == self.metadata.generation
            && status.last_successful_version.as_deref()
                == Some(self.spec.version.as_str())
    }
}
