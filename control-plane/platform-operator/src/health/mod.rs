//! Background availability polling.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use platform_models::{Availability, ComponentState, Platform};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::effective::effective_spec;
use crate::error::OperatorError;
use crate::k8s::{self, KubeClient};
use crate::registry::Registry;
use crate::status::{StatusUpdater, UpdateEvent};

/// Availability computed by one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvailabilityStatus {
    pub components: BTreeMap<String, Availability>,
    /// `"available/enabled"`.
    pub available: String,
    /// Version of the Platform the snapshot was computed from.
    pub resource_version: Option<String>,
}

impl AvailabilityStatus {
    /// Equal per-component values and aggregate, ignoring the source version.
    pub fn same_as(&self, other: &AvailabilityStatus) -> bool {
        self.components == other.components && self.available == other.available
    }
}

pub struct HealthChecker {
    client: Arc<dyn KubeClient>,
    registry: Arc<Registry>,
    updater: Arc<StatusUpdater>,
    interval: Duration,
    token: Mutex<Option<CancellationToken>>,
    last_sent: Mutex<Option<AvailabilityStatus>>,
}

impl HealthChecker {
    pub fn new(
        client: Arc<dyn KubeClient>,
        registry: Arc<Registry>,
        updater: Arc<StatusUpdater>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            updater,
            interval,
            token: Mutex::new(None),
            last_sent: Mutex::new(None),
        }
    }

    /// Starts polling. Returns `false` if already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut guard = self.token.lock().await;
        if guard.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        *guard = Some(token.clone());
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("health check loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = this.tick().await {
                            warn!(error = %e, "health check failed");
                        }
                    }
                }
            }
        });
        info!(interval = ?self.interval, "health checker started");
        true
    }

    /// Stops polling. Returns `false` if it was not running.
    pub async fn pause(&self) -> bool {
        match self.token.lock().await.take() {
            Some(token) => {
                token.cancel();
                info!("health checker paused");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.token.lock().await.is_some()
    }

    /// Computes availability once and publishes it when it changed.
    /// Returns whether an update was sent.
    pub async fn tick(&self) -> Result<bool, OperatorError> {
        let mut platforms =
            k8s::list::<Platform>(self.client.as_ref(), None, None).await?;
        if platforms.len() != 1 {
            debug!(count = platforms.len(), "skipping health check, need exactly one platform");
            return Ok(false);
        }
        let Some(platform) = platforms.pop() else {
            return Ok(false);
        };
        let snapshot = self.compute(&platform).await?;

        let event = UpdateEvent::for_platform(&platform)
            .with_availability(snapshot.clone());
        let mut last = self.last_sent.lock().await;
        let reflected = !event.changes(platform.status.as_ref());
        // sent for this very resource version, still queued
        let queued = last.as_ref().is_some_and(|l| {
            l.same_as(&snapshot) && l.resource_version == snapshot.resource_version
        });
        if reflected || queued {
            *last = Some(snapshot);
            return Ok(false);
        }
        debug!(available = %snapshot.available, "availability changed");
        self.updater.update(event).await?;
        *last = Some(snapshot);
        Ok(true)
    }

    async fn compute(
        &self,
        platform: &Platform,
    ) -> Result<AvailabilityStatus, OperatorError> {
        let effective = effective_spec(&platform.spec)?;
        let statuses = platform
            .status
            .as_ref()
            .map(|s| &s.components);

        let mut components = BTreeMap::new();
        let mut available = 0;
        for comp in self.registry.iter() {
            if !comp.is_enabled(&effective) {
                continue;
            }
            let Some(details) = statuses.and_then(|s| s.get(comp.name())) else {
                continue;
            };
            let value = if details.state != ComponentState::Ready {
                Availability::Unavailable
            } else {
                let (reason, value) = comp.is_available(self.client.as_ref()).await;
                if value != Availability::Available {
                    debug!(component = %comp.name(), %reason, "component unavailable");
                }
                value
            };
            if value == Availability::Available {
                available += 1;
            }
            components.insert(comp.name().to_string(), value);
        }

        Ok(AvailabilityStatus {
            available: format!("{available}/{}", components.len()),
            components,
            resource_version: platform.resource_version(),
        })
    }
}
