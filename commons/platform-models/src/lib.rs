pub mod bom;
pub mod catalog;
pub mod module;
pub mod overrides;
pub mod platform;
pub mod semver;

use std::path::PathBuf;

use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};

pub use bom::Bom;
pub use catalog::Catalog;
pub use module::{Module, ModuleSpec, ModuleStatus};
pub use overrides::{KeyRef, OverrideList, OverrideSource, Overrides};
pub use platform::{
    Availability, ComponentSpec, ComponentState, ComponentStatusDetails,
    Condition, ConditionStatus, ConditionType, Platform, PlatformSpec,
    PlatformState, PlatformStatus,
};
pub use semver::SemVersion;

/// Annotation on a Module naming the owning Platform.
pub const OWNER_NAME_ANNOTATION: &str = "platform.dev/owner-name";
/// Annotation on a Module naming the owning Platform's namespace.
pub const OWNER_NAMESPACE_ANNOTATION: &str = "platform.dev/owner-namespace";
/// Label on a Module carrying the owning Platform's UID.
pub const OWNER_UID_LABEL: &str = "platform.dev/owner-uid";
/// Label on override copies naming the Module they belong to.
pub const MODULE_OWNER_LABEL: &str = "platform.dev/module-owner";

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid yaml document: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Schema for free-form fields so the API server keeps their content.
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut obj = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    obj.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".into(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(obj)
}
