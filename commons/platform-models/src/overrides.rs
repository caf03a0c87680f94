use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to one key of a Secret or ConfigMap.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyRef {
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

/// One override entry. Normally exactly one field is set.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<KeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<KeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::preserve_unknown_fields")]
    pub values: Option<Value>,
}

/// The older layout nested overrides under `installOverrides`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LegacyInstallOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_changes: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_overrides: Vec<Overrides>,
}

/// Overrides as read from either wire layout.
#[derive(Clone, Debug, PartialEq)]
pub enum OverrideList {
    Current(Vec<Overrides>),
    Legacy(LegacyInstallOverrides),
}

/// Canonical override shape used past the resource boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum OverrideSource {
    Inline(Value),
    SecretRef(KeyRef),
    ConfigMapRef(KeyRef),
}

impl Overrides {
    fn into_sources(self) -> impl Iterator<Item = OverrideSource> {
        let Overrides {
            config_map_ref,
            secret_ref,
            values,
        } = self;
        config_map_ref
            .map(OverrideSource::ConfigMapRef)
            .into_iter()
            .chain(secret_ref.map(OverrideSource::SecretRef))
            .chain(values.map(OverrideSource::Inline))
    }
}

impl OverrideList {
    pub fn is_empty(&self) -> bool {
        match self {
            OverrideList::Current(list) => list.is_empty(),
            OverrideList::Legacy(legacy) => legacy.value_overrides.is_empty(),
        }
    }

    /// Flattens the list into sources, preserving declaration order.
    pub fn into_sources(self) -> Vec<OverrideSource> {
        let entries = match self {
            OverrideList::Current(list) => list,
            OverrideList::Legacy(legacy) => legacy.value_overrides,
        };
        entries.into_iter().flat_map(Overrides::into_sources).collect()
    }
}

impl OverrideSource {
    /// Name of the referenced Secret or ConfigMap, if any.
    pub fn resource_name(&self) -> Option<&str> {
        match self {
            OverrideSource::Inline(_) => None,
            OverrideSource::SecretRef(r) | OverrideSource::ConfigMapRef(r) => {
                Some(&r.name)
            }
        }
    }
}
