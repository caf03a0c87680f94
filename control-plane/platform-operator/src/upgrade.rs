//! Version gate: decides whether a Platform may be reconciled at the
//! version the operator ships with.

use platform_models::bom::BOM_VERSION_PLACEHOLDER;
use platform_models::{Bom, Platform, SemVersion};
use tracing::debug;

use crate::error::OperatorError;

/// Version used when a development BOM carries the placeholder token.
pub const DEFAULT_DEV_VERSION: &str = "1.0.1";
pub const INSTALL_VERSION_ENV: &str = "PLATFORM_INSTALL_VERSION";

#[derive(Debug, Clone)]
pub struct UpgradeGate {
    bom_version: SemVersion,
    enabled: bool,
}

fn parse(version: &str) -> Result<SemVersion, OperatorError> {
    Ok(SemVersion::parse(version.trim())?)
}

fn status_version(platform: &Platform) -> &str {
    platform
        .status
        .as_ref()
        .and_then(|s| s.version.as_deref())
        .unwrap_or("")
        .trim()
}

impl UpgradeGate {
    pub fn new(bom_version: SemVersion, enabled: bool) -> Self {
        Self {
            bom_version,
            enabled,
        }
    }

    /// Builds the gate from the BOM, resolving the development placeholder
    /// from `PLATFORM_INSTALL_VERSION`.
    pub fn from_bom(bom: &Bom, enabled: bool) -> Result<Self, OperatorError> {
        let env = std::env::var(INSTALL_VERSION_ENV).ok();
        let version = resolve_bom_version(bom.version(), env.as_deref());
        Ok(Self::new(parse(&version)?, enabled))
    }

    pub fn bom_version(&self) -> &SemVersion {
        &self.bom_version
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checks a new spec version against the BOM, the installed version and
    /// the previous spec version.
    pub fn validate_new_version(
        &self,
        status_version: &str,
        current_spec_version: &str,
        new_version: &str,
    ) -> Result<(), OperatorError> {
        let requested = parse(new_version)?;
        if requested != self.bom_version {
            return Err(OperatorError::Validation(format!(
                "Requested version {requested} does not match BOM version v{}, please upgrade to the current BOM version",
                self.bom_version
            )));
        }

        // Status is empty until the first install completes.
        let status_version = status_version.trim();
        if !status_version.is_empty() {
            let installed = parse(status_version)?;
            if requested < installed {
                return Err(OperatorError::Validation(format!(
                    "Requested version {requested} less than installed version {installed}, rollback is not supported"
                )));
            }
        }

        let current = current_spec_version.trim();
        if !current.is_empty() {
            let current = parse(current)?;
            if requested < current {
                return Err(OperatorError::Validation(format!(
                    "Requested version {requested} is not newer than current version {current}"
                )));
            }
        }
        Ok(())
    }

    /// Without a version bump, any edit is refused while the installed
    /// version lags the BOM.
    pub fn check_upgrade_required(
        &self,
        status_version: &str,
    ) -> Result<(), OperatorError> {
        let installed = status_version.trim();
        if installed.is_empty() {
            return Ok(());
        }
        if self.bom_version > parse(installed)? {
            return Err(OperatorError::Validation(format!(
                "Upgrade required for update, set version field to v{} to upgrade",
                self.bom_version
            )));
        }
        Ok(())
    }

    pub fn validate_upgrade_request(
        &self,
        new_spec_version: &str,
        status_version: &str,
        current_spec_version: &str,
    ) -> Result<(), OperatorError> {
        if !self.enabled {
            debug!("version validation disabled");
            return Ok(());
        }
        if !new_spec_version.trim().is_empty() {
            return self.validate_new_version(
                status_version,
                current_spec_version,
                new_spec_version,
            );
        }
        self.check_upgrade_required(status_version)
    }

    /// True when the spec version, or the installed version when no spec
    /// version is set, is below the BOM.
    pub fn is_upgrade_required(
        &self,
        platform: &Platform,
    ) -> Result<bool, OperatorError> {
        if !self.enabled {
            return Ok(false);
        }
        let spec_version = platform.spec.version.trim();
        if !spec_version.is_empty() {
            return Ok(parse(spec_version)? < self.bom_version);
        }
        let installed = status_version(platform);
        if !installed.is_empty() {
            return Ok(parse(installed)? < self.bom_version);
        }
        Ok(false)
    }
}

/// Picks the version the operator installs from a raw BOM version.
pub fn resolve_bom_version(raw: &str, install_version: Option<&str>) -> String {
    if raw != BOM_VERSION_PLACEHOLDER {
        return raw.to_string();
    }
    install_version
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(DEFAULT_DEV_VERSION)
        .to_string()
}

/// True when the spec requests a version other than the installed one.
pub fn is_upgrading(platform: &Platform) -> bool {
    let spec_version = platform.spec.version.trim();
    !spec_version.is_empty() && spec_version != status_version(platform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_models::{PlatformSpec, PlatformStatus};

    fn gate(bom: &str) -> UpgradeGate {
        UpgradeGate::new(SemVersion::parse(bom).unwrap(), true)
    }

    fn platform(spec: &str, status: Option<&str>) -> Platform {
        let mut p = Platform::new(
            "platform",
            PlatformSpec {
                version: spec.into(),
                ..Default::default()
            },
        );
        p.status = status.map(|v| PlatformStatus {
            version: Some(v.into()),
            ..Default::default()
        });
        p
    }

    #[test]
    fn mismatch_names_both_versions() {
        let err = gate("1.1.0")
            .validate_upgrade_request("1.0.0", "1.0.0", "")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("1.0.0") && msg.contains("1.1.0"), "{msg}");
        assert!(msg.contains("please upgrade to the current BOM version"));
    }

    #[test]
    fn rollback_is_rejected() {
        let err = gate("1.0.0")
            .validate_upgrade_request("1.0.0", "1.1.0", "")
            .unwrap_err();
        assert!(err.to_string().contains("rollback is not supported"));
    }

    #[test]
    fn matching_version_at_or_above_status_passes() {
        let g = gate("v1.1.0");
        for status in ["", "1.0.0", "1.1.0", "v1.1.0+build.7"] {
            g.validate_upgrade_request("1.1.0", status, "").unwrap();
        }
    }

    #[test]
    fn gate_properties_hold_for_version_triples() {
        let versions = ["0.9.0", "1.0.0", "1.0.1-rc.1", "1.0.1", "1.1.0"];
        for m in versions {
            let g = gate(m);
            for s in versions {
                for t in versions {
                    let res = g.validate_upgrade_request(s, t, "");
                    let (sv, tv, mv) = (
                        SemVersion::parse(s).unwrap(),
                        SemVersion::parse(t).unwrap(),
                        SemVersion::parse(m).unwrap(),
                    );
                    if sv != mv {
                        let msg = res.unwrap_err().to_string();
                        assert!(msg.contains(&sv.to_string()), "{msg}");
                        assert!(msg.contains(&mv.to_string()), "{msg}");
                    } else if sv < tv {
                        assert!(res.unwrap_err().to_string().contains("rollback"));
                    } else {
                        assert!(res.is_ok(), "{s} {t} {m}");
                    }
                }
            }
        }
    }

    #[test]
    fn not_newer_than_spec() {
        let err = gate("1.0.0")
            .validate_new_version("", "1.2.0", "1.0.0")
            .unwrap_err();
        assert!(err.to_string().contains("is not newer than current version 1.2.0"));
    }

    #[test]
    fn edits_need_upgrade_when_installed_is_older() {
        let g = gate("1.1.0");
        let err = g.validate_upgrade_request("", "1.0.0", "").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Upgrade required for update, set version field to v1.1.0 to upgrade"
        );
        g.validate_upgrade_request("", "", "").unwrap();
        g.validate_upgrade_request("", "1.1.0", "").unwrap();
    }

    #[test]
    fn disabled_gate_allows_everything() {
        let g = UpgradeGate::new(SemVersion::new(2, 0, 0), false);
        g.validate_upgrade_request("1.0.0", "1.5.0", "").unwrap();
        assert!(!g.is_upgrade_required(&platform("", Some("1.0.0"))).unwrap());
    }

    #[test]
    fn upgrade_required_and_upgrading() {
        let g = gate("1.1.0");
        assert!(g.is_upgrade_required(&platform("1.0.0", None)).unwrap());
        assert!(g.is_upgrade_required(&platform("", Some("1.0.0"))).unwrap());
        assert!(!g.is_upgrade_required(&platform("1.1.0", Some("1.0.0"))).unwrap());
        assert!(!g.is_upgrade_required(&platform("", None)).unwrap());

        assert!(is_upgrading(&platform("1.1.0", Some("1.0.0"))));
        assert!(is_upgrading(&platform("1.1.0", None)));
        assert!(!is_upgrading(&platform("1.1.0", Some("1.1.0"))));
        assert!(!is_upgrading(&platform("", Some("1.0.0"))));
    }

    #[test]
    fn placeholder_version_resolution() {
        assert_eq!(resolve_bom_version("1.2.3", Some("9.9.9")), "1.2.3");
        assert_eq!(resolve_bom_version(BOM_VERSION_PLACEHOLDER, None), "1.0.1");
        assert_eq!(
            resolve_bom_version(BOM_VERSION_PLACEHOLDER, Some("1.4.0")),
            "1.4.0"
        );
    }
}
