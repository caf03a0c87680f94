use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::overrides::{LegacyInstallOverrides, OverrideList, Overrides};

/// Desired state of the whole platform installation.
#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq,
)]
#[kube(
    group = "install.platform.dev",
    version = "v1alpha1",
    kind = "Platform",
    plural = "platforms",
    shortname = "plat",
    namespaced,
    status = "PlatformStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.available"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Requested product version. Empty means no upgrade is requested.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Installation profile: prod, dev or managed-cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_name: Option<String>,
    /// Per-component configuration keyed by the component's json name
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecuritySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_spec_templates: Vec<VolumeClaimSpecTemplate>,
}

impl PlatformSpec {
    pub fn component(&self, json_name: &str) -> Option<&ComponentSpec> {
        self.components.get(json_name)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Overrides>,
    /// Older override layout, still accepted on read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_overrides: Option<LegacyInstallOverrides>,
    /// Free-form component settings, e.g. `injectionEnabled` for istio
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "crate::preserve_unknown_fields")]
    pub settings: BTreeMap<String, Value>,
}

impl ComponentSpec {
    /// Overrides in whichever wire layout the resource used.
    pub fn override_list(&self) -> OverrideList {
        if self.overrides.is_empty() {
            if let Some(legacy) = &self.install_overrides {
                return OverrideList::Legacy(legacy.clone());
            }
        }
        OverrideList::Current(self.overrides.clone())
    }

    /// Reads a nested setting, e.g. `setting(&["oci", "secretName"])`.
    pub fn setting(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.settings.get(*first)?, |v, key| v.get(*key))
    }

    pub fn setting_bool(&self, path: &[&str]) -> Option<bool> {
        self.setting(path).and_then(Value::as_bool)
    }

    pub fn setting_str(&self, path: &[&str]) -> Option<&str> {
        self.setting(path).and_then(Value::as_str)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin_subjects: Vec<SubjectRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub monitor_subjects: Vec<SubjectRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimSpecTemplate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::preserve_unknown_fields")]
    pub spec: Option<Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PlatformState>,
    /// Version the platform was last installed or upgraded to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentStatusDetails>,
    /// Aggregate availability as "available/enabled"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum PlatformState {
    Ready,
    Installing,
    Upgrading,
    Uninstalling,
    Reconciling,
    Failed,
    Paused,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatusDetails {
    pub name: String,
    pub state: ComponentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub last_reconciled_generation: i64,
    #[serde(default)]
    pub reconciling_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<Availability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "PascalCase")]
pub enum ComponentState {
    #[default]
    Disabled,
    PreInstalling,
    Installing,
    Uninstalling,
    Uninstalled,
    Upgrading,
    Error,
    Ready,
    Failed,
    Reconciling,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum Availability {
    Available,
    Unavailable,
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionType {
    PreInstall,
    InstallStarted,
    InstallComplete,
    InstallFailed,
    UninstallStarted,
    UninstallComplete,
    UninstallFailed,
    UpgradeStarted,
    UpgradePaused,
    UpgradeFailed,
    UpgradeComplete,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Endpoints exposed by an installed platform.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keycloak_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rancher_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opensearch_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opensearch_dashboards_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kiali_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jaeger_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argocd_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thanos_query_url: Option<String>,
}
