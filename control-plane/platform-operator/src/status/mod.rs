//! Single writer for the Platform status subresource.
//!
//! The reconciler and the health checker never write status themselves.
//! They send [`UpdateEvent`]s to the [`StatusUpdater`], whose task applies
//! them one at a time on a freshly read copy of the resource.

use std::collections::BTreeMap;
use std::sync::Arc;

use flume::{Receiver, Sender};
use kube::ResourceExt;
use platform_models::platform::InstanceInfo;
use platform_models::{
    ComponentStatusDetails, Condition, Platform, PlatformState, PlatformStatus,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::error::OperatorError;
use crate::health::AvailabilityStatus;
use crate::k8s::{self, KubeClient};

/// A partial status change. Unset fields leave the stored status alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateEvent {
    pub name: String,
    pub namespace: String,
    pub state: Option<PlatformState>,
    pub version: Option<String>,
    pub conditions: Option<Vec<Condition>>,
    pub instance: Option<InstanceInfo>,
    /// Entries replace the stored ones with the same key.
    pub components: BTreeMap<String, ComponentStatusDetails>,
    pub availability: Option<AvailabilityStatus>,
}

impl UpdateEvent {
    pub fn for_platform(platform: &Platform) -> Self {
        Self {
            name: platform.name_any(),
            namespace: platform.namespace().unwrap_or_default(),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: PlatformState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_instance(mut self, instance: InstanceInfo) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn with_components(
        mut self,
        components: BTreeMap<String, ComponentStatusDetails>,
    ) -> Self {
        self.components = components;
        self
    }

    pub fn with_availability(mut self, availability: AvailabilityStatus) -> Self {
        self.availability = Some(availability);
        self
    }

    pub fn apply(&self, status: &mut PlatformStatus) {
        if let Some(state) = self.state {
            status.state = Some(state);
        }
        if let Some(version) = &self.version {
            status.version = Some(version.clone());
        }
        if let Some(conditions) = &self.conditions {
            status.conditions = conditions.clone();
        }
        if let Some(instance) = &self.instance {
            status.instance = Some(instance.clone());
        }
        for (name, details) in &self.components {
            let mut details = details.clone();
            // availability belongs to the health checker
            if details.available.is_none() {
                details.available = status
                    .components
                    .get(name)
                    .and_then(|stored| stored.available);
            }
            status.components.insert(name.clone(), details);
        }
        if let Some(availability) = &self.availability {
            status.available = Some(availability.available.clone());
            // components missing from the snapshot are disabled
            for (name, details) in status.components.iter_mut() {
                details.available = availability.components.get(name).copied();
            }
        }
    }

    /// Whether applying the event would change `status`.
    pub fn changes(&self, status: Option<&PlatformStatus>) -> bool {
        let before = status.cloned().unwrap_or_default();
        let mut after = before.clone();
        self.apply(&mut after);
        status.is_none() || after != before
    }
}

#[derive(Debug)]
pub enum StatusMessage {
    Update(Box<UpdateEvent>),
    Shutdown,
}

struct Running {
    tx: Sender<StatusMessage>,
    handle: JoinHandle<()>,
}

pub struct StatusUpdater {
    client: Arc<dyn KubeClient>,
    capacity: usize,
    running: Mutex<Option<Running>>,
}

impl StatusUpdater {
    pub fn new(client: Arc<dyn KubeClient>, capacity: usize) -> Self {
        Self {
            client,
            capacity: capacity.max(1),
            running: Mutex::new(None),
        }
    }

    /// Starts the writer task. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }
        *running = Some(self.spawn());
        true
    }

    fn spawn(&self) -> Running {
        let (tx, rx) = flume::bounded(self.capacity);
        let client = self.client.clone();
        let handle = tokio::spawn(async move { drain(client, rx).await });
        info!(capacity = self.capacity, "status updater started");
        Running { tx, handle }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Queues an update, starting the writer if needed. Waits while the
    /// queue is full.
    pub async fn update(&self, event: UpdateEvent) -> Result<(), OperatorError> {
        let tx = {
            let mut running = self.running.lock().await;
            running.get_or_insert_with(|| self.spawn()).tx.clone()
        };
        trace!(name = %event.name, "queueing status update");
        tx.send_async(StatusMessage::Update(Box::new(event)))
            .await
            .map_err(|_| OperatorError::UpdaterStopped)
    }

    /// Flushes queued updates and stops the writer.
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        if running.tx.send_async(StatusMessage::Shutdown).await.is_err() {
            debug!("status updater already gone");
        }
        if let Err(e) = running.handle.await {
            error!(error = %e, "status updater task failed");
        }
        info!("status updater stopped");
    }
}

async fn drain(client: Arc<dyn KubeClient>, rx: Receiver<StatusMessage>) {
    while let Ok(msg) = rx.recv_async().await {
        let event = match msg {
            StatusMessage::Update(event) => event,
            StatusMessage::Shutdown => break,
        };
        match write_status(client.as_ref(), &event).await {
            Ok(true) => debug!(name = %event.name, "status updated"),
            Ok(false) => trace!(name = %event.name, "status unchanged"),
            // The next reconcile recomputes whatever was lost here.
            Err(e) if e.is_conflict() => {
                debug!(name = %event.name, error = %e, "status update conflict")
            }
            Err(e) => error!(name = %event.name, error = %e, "status update failed"),
        }
    }
}

async fn write_status(
    client: &dyn KubeClient,
    event: &UpdateEvent,
) -> Result<bool, OperatorError> {
    let Some(mut platform) =
        k8s::get::<Platform>(client, Some(&event.namespace), &event.name).await?
    else {
        debug!(name = %event.name, "platform gone, dropping status update");
        return Ok(false);
    };
    if !event.changes(platform.status.as_ref()) {
        return Ok(false);
    }
    let mut status = platform.status.take().unwrap_or_default();
    event.apply(&mut status);
    platform.status = Some(status);
    k8s::replace_status(client, &platform).await?;
    Ok(true)
}
