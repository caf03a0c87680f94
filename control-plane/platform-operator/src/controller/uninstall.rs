//! Finalizer path. Each phase requeues on its own until it reports done;
//! the finalizer goes last.

use std::collections::BTreeSet;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Secret, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, RoleBinding,
};
use kube::ResourceExt;
use kube::api::{ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use platform_models::{ConditionType, Platform, PlatformSpec};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::ControllerContext;
use super::postwork::rancher_resource;
use super::prework::{RANCHER_NAMESPACE, REGISTRATION_SECRET};
use super::reconcile::transition;
use crate::error::OperatorError;
use crate::k8s::{self, KubeClient};
use crate::registry::Registry;
use crate::result::ReconcileResult;

pub const FINALIZER: &str = "platform.dev/finalizer";

pub const MC_NAMESPACE: &str = "platform-mc";
pub const MANAGED_CLUSTER_ROLE: &str = "platform-managed-cluster";
pub const MC_AGENT_SECRET: &str = "platform-cluster-agent";

pub const CA_ROOT_CERT: &str = "istio-ca-root-cert";
pub const NODE_EXPORTER: &str = "platform-node-exporter";

const RANCHER_LOCAL_CLUSTER: &str = "local";
const RANCHER_PROVISIONERS: &[&str] =
    &["rke2", "k3s", "rancherKubernetesEngine"];
const RANCHER_WEBHOOK: &str = "rancher.cattle.io";
const RANCHER_NAMESPACES: &[&str] = &[
    RANCHER_NAMESPACE,
    "cattle-fleet-system",
    "cattle-fleet-local-system",
    "cattle-global-data",
    RANCHER_LOCAL_CLUSTER,
];

/// Namespaces never deleted on uninstall.
const PROTECTED_NAMESPACES: &[&str] =
    &["default", "kube-system", "kube-public", "kube-node-lease"];

pub fn mc_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("clusters.platform.dev", "v1alpha1", kind),
        plural,
    )
}

pub fn has_finalizer(platform: &Platform) -> bool {
    platform.finalizers().iter().any(|f| f == FINALIZER)
}

#[instrument(
    skip_all,
    fields(
        ns = %actual.namespace().unwrap_or_default(),
        name = %actual.name_any(),
    )
)]
pub async fn reconcile_uninstall(
    ctx: &ControllerContext,
    actual: &Platform,
    effective: &PlatformSpec,
) -> ReconcileResult {
    if !has_finalizer(actual) {
        return ReconcileResult::done();
    }
    let uid = actual.uid().unwrap_or_default();
    let generation = actual.metadata.generation.unwrap_or(0);
    if ctx.seen.first_time(&uid, generation, "uninstall-started").await {
        info!("uninstall started");
        let started = transition(
            ctx,
            actual,
            ConditionType::UninstallStarted,
            "Uninstall in progress",
        );
        if let Err(e) = started.await {
            return ReconcileResult::from_error(e, &ctx.backoff);
        }
    }

    let provisioned = match is_rancher_provisioned(ctx.client.as_ref()).await {
        Ok(p) => p,
        Err(e) => return ReconcileResult::from_error(e, &ctx.backoff),
    };

    if let Err(e) = pre_uninstall(ctx, effective, provisioned).await {
        warn!(error = %e, "pre-uninstall failed");
        return ReconcileResult::from_error(e, &ctx.backoff);
    }

    let drained = ctx.modules.delete_modules(actual, effective, true).await;
    if !drained.is_complete() {
        debug!("waiting for modules to drain");
        return drained;
    }

    if let Err(e) = post_uninstall(ctx, provisioned).await {
        warn!(error = %e, "post-uninstall failed");
        return ReconcileResult::from_error(e, &ctx.backoff);
    }

    let completed = transition(
        ctx,
        actual,
        ConditionType::UninstallComplete,
        "Uninstall complete",
    );
    if let Err(e) = completed.await {
        return ReconcileResult::from_error(e, &ctx.backoff);
    }
    if let Err(e) = remove_finalizer(ctx.client.as_ref(), actual).await {
        return ReconcileResult::from_error(e, &ctx.backoff);
    }
    ctx.seen.forget(&uid).await;
    info!("uninstall complete, finalizer removed");
    ReconcileResult::done()
}

async fn pre_uninstall(
    ctx: &ControllerContext,
    effective: &PlatformSpec,
    provisioned: bool,
) -> Result<(), OperatorError> {
    let client = ctx.client.as_ref();
    if !provisioned
        && rancher_installed(client, &ctx.registry, effective).await?
    {
        let ar = rancher_resource("Cluster", "clusters");
        if client.delete(&ar, None, RANCHER_LOCAL_CLUSTER).await? {
            info!("deleted the rancher local cluster record");
        }
    }
    pre_uninstall_mc(client, &ctx.cfg.system_namespace).await
}

async fn rancher_installed(
    client: &dyn KubeClient,
    registry: &Registry,
    effective: &PlatformSpec,
) -> Result<bool, OperatorError> {
    match registry.get("rancher") {
        Some(rancher) if rancher.is_enabled(effective) => {
            rancher.is_installed(client).await
        }
        _ => Ok(false),
    }
}

/// A cluster Rancher itself provisioned must keep Rancher's namespaces,
/// or removing them takes the cluster down with it.
pub async fn is_rancher_provisioned(
    client: &dyn KubeClient,
) -> Result<bool, OperatorError> {
    let ar = rancher_resource("Cluster", "clusters");
    let local = match client.get(&ar, None, RANCHER_LOCAL_CLUSTER).await {
        Ok(local) => local,
        // Rancher types are not installed
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };
    let driver = local
        .as_ref()
        .and_then(|c| c.data.pointer("/status/driver"))
        .and_then(Value::as_str);
    Ok(driver.is_some_and(|d| RANCHER_PROVISIONERS.contains(&d)))
}

fn project_namespaces(project: &DynamicObject) -> Vec<String> {
    project
        .data
        .pointer("/spec/template/namespaces")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|ns| ns.pointer("/metadata/name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// Removes what multi-cluster registration left behind: managed cluster
/// role bindings in project namespaces, the managed cluster records with
/// their service accounts and, on a managed cluster, its registration.
pub async fn pre_uninstall_mc(
    client: &dyn KubeClient,
    system_ns: &str,
) -> Result<(), OperatorError> {
    let projects = client
        .list(&mc_resource("Project", "projects"), Some(MC_NAMESPACE), None)
        .await?;
    for project in &projects {
        for ns in project_namespaces(project) {
            for rb in k8s::list::<RoleBinding>(client, Some(&ns), None).await? {
                if rb.role_ref.name != MANAGED_CLUSTER_ROLE {
                    continue;
                }
                let name = rb.name_any();
                k8s::delete::<RoleBinding>(client, Some(&ns), &name).await?;
                debug!(%ns, %name, "deleted managed cluster role binding");
            }
        }
    }

    let vmc_ar = mc_resource("ManagedCluster", "managedclusters");
    for vmc in client.list(&vmc_ar, Some(MC_NAMESPACE), None).await? {
        let name = vmc.name_any();
        let sa = vmc
            .data
            .pointer("/spec/serviceAccount")
            .and_then(Value::as_str);
        if let Some(sa) = sa {
            k8s::delete::<ServiceAccount>(client, Some(MC_NAMESPACE), sa)
                .await?;
        }
        client.delete(&vmc_ar, Some(MC_NAMESPACE), &name).await?;
        info!(cluster = %name, "deleted managed cluster record");
    }

    if projects.is_empty()
        && k8s::delete::<Namespace>(client, None, MC_NAMESPACE).await?
    {
        info!(namespace = MC_NAMESPACE, "deleted multi-cluster namespace");
    }

    let ns = Some(system_ns);
    if k8s::get::<Secret>(client, ns, MC_AGENT_SECRET).await?.is_some() {
        k8s::delete::<Secret>(client, ns, REGISTRATION_SECRET).await?;
        k8s::delete::<Secret>(client, ns, MC_AGENT_SECRET).await?;
        info!("deleted managed cluster registration");
    }
    Ok(())
}

async fn post_uninstall(
    ctx: &ControllerContext,
    provisioned: bool,
) -> Result<(), OperatorError> {
    let client = ctx.client.as_ref();
    delete_ca_root_certs(client).await?;
    k8s::delete::<ClusterRoleBinding>(client, None, NODE_EXPORTER).await?;
    k8s::delete::<ClusterRole>(client, None, NODE_EXPORTER).await?;
    rancher_post_uninstall(client, provisioned).await?;

    let mut keep = vec![ctx.cfg.install_namespace.as_str()];
    if provisioned {
        keep.extend_from_slice(RANCHER_NAMESPACES);
    }
    let system_ns = ctx.cfg.system_namespace.as_str();
    delete_namespaces(client, &ctx.registry, system_ns, &keep).await?;
    Ok(())
}

pub async fn delete_ca_root_certs(
    client: &dyn KubeClient,
) -> Result<usize, OperatorError> {
    let mut deleted = 0;
    for cm in k8s::list::<ConfigMap>(client, None, None).await? {
        if cm.metadata.name.as_deref() != Some(CA_ROOT_CERT) {
            continue;
        }
        let ns = cm.metadata.namespace.as_deref();
        if k8s::delete::<ConfigMap>(client, ns, CA_ROOT_CERT).await? {
            deleted += 1;
        }
    }
    if deleted > 0 {
        info!(deleted, "deleted istio root certificates");
    }
    Ok(deleted)
}

/// Rancher's webhooks outlive its namespace and block later API calls.
/// The namespaces go too, unless Rancher provisioned this cluster.
pub async fn rancher_post_uninstall(
    client: &dyn KubeClient,
    provisioned: bool,
) -> Result<(), OperatorError> {
    k8s::delete::<ValidatingWebhookConfiguration>(client, None, RANCHER_WEBHOOK)
        .await?;
    k8s::delete::<MutatingWebhookConfiguration>(client, None, RANCHER_WEBHOOK)
        .await?;
    if provisioned {
        debug!("rancher provisioned this cluster, keeping its namespaces");
        return Ok(());
    }
    for ns in RANCHER_NAMESPACES {
        k8s::delete::<Namespace>(client, None, ns).await?;
    }
    Ok(())
}

/// Deletes the namespaces the platform installed into, apart from `keep`.
pub async fn delete_namespaces(
    client: &dyn KubeClient,
    registry: &Registry,
    system_ns: &str,
    keep: &[&str],
) -> Result<usize, OperatorError> {
    let namespaces: BTreeSet<&str> = registry
        .iter()
        .map(|c| c.namespace())
        .chain([system_ns])
        .filter(|ns| !keep.contains(ns) && !PROTECTED_NAMESPACES.contains(ns))
        .collect();
    let mut deleted = 0;
    for ns in namespaces {
        if k8s::delete::<Namespace>(client, None, ns).await? {
            debug!(namespace = %ns, "namespace deleted");
            deleted += 1;
        }
    }
    Ok(deleted)
}

pub async fn remove_finalizer(
    client: &dyn KubeClient,
    platform: &Platform,
) -> Result<(), OperatorError> {
    let finals: Vec<&String> = platform
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .collect();
    let patch = json!({"metadata": {"finalizers": finals}});
    k8s::patch::<Platform>(
        client,
        platform.namespace().as_deref(),
        &platform.name_any(),
        &patch,
    )
    .await
}
