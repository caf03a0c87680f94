//! Effective configuration: the actual spec layered over profile defaults.

use std::fmt;
use std::str::FromStr;

use platform_models::{Platform, PlatformSpec};
use serde_json::Value;

use crate::error::OperatorError;

const PROD: &str = include_str!("../profiles/prod.yaml");
const DEV: &str = include_str!("../profiles/dev.yaml");
const MANAGED_CLUSTER: &str = include_str!("../profiles/managed-cluster.yaml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    Prod,
    Dev,
    ManagedCluster,
}

impl Profile {
    fn document(self) -> &'static str {
        match self {
            Profile::Prod => PROD,
            Profile::Dev => DEV,
            Profile::ManagedCluster => MANAGED_CLUSTER,
        }
    }

    /// Profile named by the spec; absent or empty means prod.
    pub fn of(spec: &PlatformSpec) -> Result<Self, OperatorError> {
        match spec.profile.as_deref() {
            None | Some("") => Ok(Profile::default()),
            Some(p) => p.parse(),
        }
    }
}

impl FromStr for Profile {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prod" => Ok(Profile::Prod),
            "dev" => Ok(Profile::Dev),
            "managed-cluster" => Ok(Profile::ManagedCluster),
            other => Err(OperatorError::Validation(format!(
                "Requested profile {other} is invalid, valid profiles are prod, dev and managed-cluster"
            ))),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Profile::Prod => "prod",
            Profile::Dev => "dev",
            Profile::ManagedCluster => "managed-cluster",
        })
    }
}

/// Recursively merges `overlay` into `base`. Objects merge key by key,
/// anything else in the overlay replaces the base value. Nulls in the
/// overlay leave the base untouched.
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            for (k, v) in o {
                if v.is_null() {
                    continue;
                }
                match b.get_mut(k) {
                    Some(existing) => merge_json(existing, v),
                    None => {
                        b.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (b, o) if !o.is_null() => *b = o.clone(),
        _ => {}
    }
}

pub fn effective_spec(actual: &PlatformSpec) -> Result<PlatformSpec, OperatorError> {
    let profile = Profile::of(actual)?;
    let mut merged: Value =
        serde_yaml::from_str(profile.document()).map_err(|e| {
            OperatorError::Configuration(format!("profile {profile} is unreadable: {e}"))
        })?;
    merge_json(&mut merged, &serde_json::to_value(actual)?);
    Ok(serde_json::from_value(merged)?)
}

/// Copy of `actual` with the effective spec. Status always comes from the
/// persisted resource.
pub fn effective_platform(actual: &Platform) -> Result<Platform, OperatorError> {
    let mut effective = actual.clone();
    effective.spec = effective_spec(&actual.spec)?;
    Ok(effective)
}
