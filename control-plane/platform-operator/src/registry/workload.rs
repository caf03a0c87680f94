use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use platform_models::Availability;

use crate::error::OperatorError;
use crate::k8s::{self, KubeClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

/// A workload whose readiness stands for a component's readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub namespace: &'static str,
    pub name: &'static str,
}

impl Workload {
    pub const fn deployment(namespace: &'static str, name: &'static str) -> Self {
        Self {
            kind: WorkloadKind::Deployment,
            namespace,
            name,
        }
    }

    pub const fn stateful_set(namespace: &'static str, name: &'static str) -> Self {
        Self {
            kind: WorkloadKind::StatefulSet,
            namespace,
            name,
        }
    }

    pub const fn daemon_set(namespace: &'static str, name: &'static str) -> Self {
        Self {
            kind: WorkloadKind::DaemonSet,
            namespace,
            name,
        }
    }
}

/// `(ready, desired)` replica counts, or `None` when the workload is absent.
pub async fn replica_counts(
    client: &dyn KubeClient,
    w: &Workload,
) -> Result<Option<(i32, i32)>, OperatorError> {
    let ns = Some(w.namespace);
    let counts = match w.kind {
        WorkloadKind::Deployment => {
            k8s::get::<Deployment>(client, ns, w.name).await?.map(|d| {
                let desired =
                    d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let ready =
                    d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
                (ready, desired)
            })
        }
        WorkloadKind::StatefulSet => {
            k8s::get::<StatefulSet>(client, ns, w.name).await?.map(|s| {
                let desired =
                    s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let ready =
                    s.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
                (ready, desired)
            })
        }
        WorkloadKind::DaemonSet => {
            k8s::get::<DaemonSet>(client, ns, w.name).await?.map(|d| {
                d.status
                    .as_ref()
                    .map(|s| (s.number_ready, s.desired_number_scheduled))
                    .unwrap_or((0, 0))
            })
        }
    };
    Ok(counts)
}

pub async fn all_exist(
    client: &dyn KubeClient,
    workloads: &[Workload],
) -> Result<bool, OperatorError> {
    if workloads.is_empty() {
        return Ok(false);
    }
    for w in workloads {
        if replica_counts(client, w).await?.is_none() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Availability of a set of workloads; the first failing one gives the reason.
pub async fn availability(
    client: &dyn KubeClient,
    workloads: &[Workload],
) -> (String, Availability) {
    for w in workloads {
        match replica_counts(client, w).await {
            Ok(Some((ready, desired))) if desired > 0 && ready >= desired => {}
            Ok(Some((ready, desired))) => {
                return (
                    format!(
                        "{:?} {}/{} has {ready}/{desired} ready replicas",
                        w.kind, w.namespace, w.name
                    ),
                    Availability::Unavailable,
                );
            }
            Ok(None) => {
                return (
                    format!("{:?} {}/{} not found", w.kind, w.namespace, w.name),
                    Availability::Unavailable,
                );
            }
            Err(e) => {
                return (
                    format!("failed to read {}/{}: {e}", w.namespace, w.name),
                    Availability::Unknown,
                );
            }
        }
    }
    (String::new(), Availability::Available)
}
