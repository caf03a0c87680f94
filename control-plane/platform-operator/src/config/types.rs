use std::time::Duration;

use envconfig::Envconfig;

use crate::result::Backoff;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "PLATFORM_OPERATOR_PROFILE", default = "dev")]
    pub profile: String,

    /// Namespace holding the Module records.
    #[envconfig(
        from = "PLATFORM_OPERATOR_INSTALL_NAMESPACE",
        default = "platform-install"
    )]
    pub install_namespace: String,

    #[envconfig(
        from = "PLATFORM_OPERATOR_SYSTEM_NAMESPACE",
        default = "platform-system"
    )]
    pub system_namespace: String,

    #[envconfig(
        from = "PLATFORM_OPERATOR_BOM_PATH",
        default = "/platform/platform-bom.json"
    )]
    pub bom_path: String,

    #[envconfig(
        from = "PLATFORM_OPERATOR_CATALOG_PATH",
        default = "/platform/catalog.yaml"
    )]
    pub catalog_path: String,

    /// Turns the upgrade gate off when false.
    /// Env: PLATFORM_OPERATOR_VERSION_CHECK
    #[envconfig(from = "PLATFORM_OPERATOR_VERSION_CHECK", default = "true")]
    pub version_check: bool,

    #[envconfig(from = "PLATFORM_OPERATOR_STATUS_QUEUE", default = "64")]
    pub status_queue: usize,

    #[envconfig(nested)]
    pub health: HealthConfig,

    #[envconfig(nested)]
    pub requeue: RequeueConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct HealthConfig {
    /// If Some, env explicitly set; otherwise the profile decides
    #[envconfig(from = "PLATFORM_OPERATOR_HEALTH_CHECK")]
    pub enabled: Option<bool>,
    #[envconfig(from = "PLATFORM_OPERATOR_HEALTH_INTERVAL_SECS", default = "30")]
    pub interval_secs: u64,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RequeueConfig {
    #[envconfig(from = "PLATFORM_OPERATOR_REQUEUE_MIN_SECS", default = "2")]
    pub min_secs: u64,
    #[envconfig(from = "PLATFORM_OPERATOR_REQUEUE_MAX_SECS", default = "3")]
    pub max_secs: u64,
    /// Range used for errors only a human can fix, e.g. a missing catalog entry
    #[envconfig(from = "PLATFORM_OPERATOR_CONFIG_REQUEUE_MIN_SECS", default = "60")]
    pub config_min_secs: u64,
    #[envconfig(from = "PLATFORM_OPERATOR_CONFIG_REQUEUE_MAX_SECS", default = "90")]
    pub config_max_secs: u64,
}

impl OperatorConfig {
    /// Apply profile → defaults mapping, while respecting explicit env overrides.
    ///
    /// The health checker runs under every profile unless
    /// `PLATFORM_OPERATOR_HEALTH_CHECK=false`.
    pub fn apply_profile_defaults(mut self) -> Self {
        if self.health.enabled.is_none() {
            self.health.enabled = Some(true);
        }
        self
    }

    pub fn health_enabled(&self) -> bool {
        self.health.enabled.unwrap_or(true)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health.interval_secs.max(1))
    }

    /// Requeue ranges; a max below its min collapses to the min.
    pub fn backoff(&self) -> Backoff {
        let range = |min: u64, max: u64| {
            (Duration::from_secs(min), Duration::from_secs(max.max(min)))
        };
        let r = &self.requeue;
        Backoff {
            short: range(r.min_secs, r.max_secs),
            configuration: range(r.config_min_secs, r.config_max_secs),
        }
    }
}
