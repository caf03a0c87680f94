//! Steps run after the modules were handed off: identity provider wiring
//! for every pass, workload restarts on upgrade only.

use std::collections::HashSet;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, PodTemplateSpec};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{ApiResource, DynamicObject, ObjectMeta};
use kube::core::GroupVersionKind;
use kube::{Resource, ResourceExt};
use platform_models::{Platform, PlatformSpec};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::ControllerContext;
use super::instance::first_host;
use super::prework::{
    ISTIO_INJECTION_LABEL, KEYCLOAK_NAMESPACE, NAMESPACE_LABEL, RANCHER_NAMESPACE,
    cleanup_mysql_backup_jobs,
};
use crate::error::OperatorError;
use crate::k8s::{self, KubeClient, OperationResult};
use crate::registry::{Registry, WorkloadKind};
use crate::result::ReconcileResult;

pub const RESTART_VERSION_ANNOTATION: &str = "platform.dev/restart-version";
pub const ISTIO_PROXY_CONTAINER: &str = "istio-proxy";

pub const KEYCLOAK_REALM: &str = "platform";
pub const RANCHER_AUTH_CONFIG: &str = "keycloakoidc";
pub const ARGOCD_NAMESPACE: &str = "argocd";
pub const ARGOCD_CONFIG_MAP: &str = "argocd-cm";
const ARGOCD_OIDC_KEY: &str = "oidc.config";

pub fn restart_version(generation: i64) -> String {
    format!("upgrade-{generation}")
}

pub fn rancher_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("management.cattle.io", "v3", kind),
        plural,
    )
}

pub async fn post_work(
    ctx: &ControllerContext,
    actual: &Platform,
    effective: &PlatformSpec,
    upgrading: bool,
) -> ReconcileResult {
    match run(ctx, actual, effective, upgrading).await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, upgrading, "post-work failed");
            ReconcileResult::from_error(e, &ctx.backoff)
        }
    }
}

async fn run(
    ctx: &ControllerContext,
    actual: &Platform,
    effective: &PlatformSpec,
    upgrading: bool,
) -> Result<ReconcileResult, OperatorError> {
    let client = ctx.client.as_ref();
    let registry = &ctx.registry;

    let rancher = registry.is_enabled("rancher", effective);
    let argocd = registry.is_enabled("argocd", effective);
    if registry.is_enabled("keycloak", effective) && (rancher || argocd) {
        let Some(issuer) = keycloak_issuer(client).await? else {
            debug!("keycloak ingress has no host yet");
            return Ok(ctx.backoff.short());
        };
        if rancher {
            configure_rancher_auth(client, &issuer).await?;
        }
        if argocd {
            configure_argocd_oidc(client, &issuer).await?;
        }
    }

    if !upgrading {
        return Ok(ReconcileResult::done());
    }

    cleanup_mysql_backup_jobs(client).await?;
    if !ctx.modules.are_modules_done_reconciling(effective).await? {
        debug!("waiting for modules before restarting workloads");
        return Ok(ctx.backoff.short());
    }

    let version = restart_version(actual.metadata.generation.unwrap_or(0));
    match ctx.bom.image_ref("istiod", "proxyv2") {
        Some(proxy) => {
            restart_outdated_sidecars(client, &proxy, &version).await?;
        }
        None => debug!("no istio proxy image in the BOM"),
    }
    if registry.is_enabled("application-operator", effective)
        && registry.is_enabled("istio", effective)
    {
        restart_applications(client, registry, &ctx.cfg.system_namespace, &version).await?;
    }
    Ok(ReconcileResult::done())
}

async fn ingress_host(
    client: &dyn KubeClient,
    ns: &str,
    name: &str,
) -> Result<Option<String>, OperatorError> {
    Ok(k8s::get::<Ingress>(client, Some(ns), name)
        .await?
        .as_ref()
        .and_then(first_host))
}

pub async fn keycloak_issuer(client: &dyn KubeClient) -> Result<Option<String>, OperatorError> {
    Ok(ingress_host(client, KEYCLOAK_NAMESPACE, "keycloak")
        .await?
        .map(|host| format!("https://{host}/auth/realms/{KEYCLOAK_REALM}")))
}

/// Points Rancher's Keycloak OIDC provider at the platform realm.
pub async fn configure_rancher_auth(
    client: &dyn KubeClient,
    issuer: &str,
) -> Result<OperationResult, OperatorError> {
    let ar = rancher_resource("AuthConfig", "authconfigs");
    let rancher_url = ingress_host(client, RANCHER_NAMESPACE, "rancher")
        .await?
        .map(|host| format!("https://{host}"));
    let desired = json!({
        "enabled": true,
        "type": "keyCloakOIDCConfig",
        "clientId": "rancher",
        "issuer": issuer,
        "authEndpoint": format!("{issuer}/protocol/openid-connect/auth"),
        "rancherUrl": rancher_url.map(|u| format!("{u}/verify-auth")),
    });
    let op = k8s::create_or_update_dynamic(
        client,
        &ar,
        DynamicObject::new(RANCHER_AUTH_CONFIG, &ar),
        move |o| {
            if let Value::Object(fields) = desired {
                for (k, v) in fields {
                    o.data[k.as_str()] = v;
                }
            }
        },
    )
    .await?;
    if op != OperationResult::Unchanged {
        info!(?op, "rancher keycloak auth provider configured");
    }
    Ok(op)
}

pub async fn configure_argocd_oidc(
    client: &dyn KubeClient,
    issuer: &str,
) -> Result<OperationResult, OperatorError> {
    let oidc = format!(
        "name: Keycloak\nissuer: {issuer}\nclientID: argocd\nrequestedScopes: [\"openid\", \"profile\", \"email\", \"groups\"]\n"
    );
    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(ARGOCD_CONFIG_MAP.into()),
            namespace: Some(ARGOCD_NAMESPACE.into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let op = k8s::create_or_update(client, cm, move |cm| {
        cm.data
            .get_or_insert_with(Default::default)
            .insert(ARGOCD_OIDC_KEY.into(), oidc);
    })
    .await?;
    if op != OperationResult::Unchanged {
        info!(?op, "argocd oidc configured");
    }
    Ok(op)
}

/// A pod-owning workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
}

fn restart_annotation(template: &PodTemplateSpec) -> Option<&str> {
    template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(RESTART_VERSION_ANNOTATION)
        .map(String::as_str)
}

async fn stamp<K>(
    client: &dyn KubeClient,
    ns: &str,
    name: &str,
    version: &str,
    template: fn(&K) -> Option<&PodTemplateSpec>,
) -> Result<bool, OperatorError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let Some(obj) = k8s::get::<K>(client, Some(ns), name).await? else {
        return Ok(false);
    };
    if template(&obj).and_then(restart_annotation) == Some(version) {
        return Ok(false);
    }
    let patch = json!({
        "spec": {"template": {"metadata": {"annotations": {RESTART_VERSION_ANNOTATION: version}}}}
    });
    k8s::patch::<K>(client, Some(ns), name, &patch).await?;
    Ok(true)
}

/// Stamps the pod template so the workload rolls its pods. Returns whether
/// a patch was needed.
pub async fn restart_workload(
    client: &dyn KubeClient,
    w: &WorkloadRef,
    version: &str,
) -> Result<bool, OperatorError> {
    let (ns, name) = (w.namespace.as_str(), w.name.as_str());
    let stamped = match w.kind {
        WorkloadKind::Deployment => {
            stamp::<Deployment>(client, ns, name, version, |d| {
                d.spec.as_ref().map(|s| &s.template)
            })
            .await?
        }
        WorkloadKind::StatefulSet => {
            stamp::<StatefulSet>(client, ns, name, version, |s| {
                s.spec.as_ref().map(|s| &s.template)
            })
            .await?
        }
        WorkloadKind::DaemonSet => {
            stamp::<DaemonSet>(client, ns, name, version, |d| {
                d.spec.as_ref().map(|s| &s.template)
            })
            .await?
        }
    };
    if stamped {
        info!(kind = ?w.kind, %ns, %name, %version, "workload restarted");
    }
    Ok(stamped)
}

/// The workload a pod ultimately belongs to, following ReplicaSets up to
/// their Deployment.
async fn pod_owner(
    client: &dyn KubeClient,
    pod: &Pod,
) -> Result<Option<WorkloadRef>, OperatorError> {
    let Some(ns) = pod.metadata.namespace.as_deref() else {
        return Ok(None);
    };
    let Some(owner) = pod
        .owner_references()
        .iter()
        .find(|o| o.controller != Some(false))
    else {
        return Ok(None);
    };
    let workload = |kind, name: &str| WorkloadRef {
        kind,
        namespace: ns.to_string(),
        name: name.to_string(),
    };
    Ok(match owner.kind.as_str() {
        "ReplicaSet" => k8s::get::<ReplicaSet>(client, Some(ns), &owner.name)
            .await?
            .and_then(|rs| {
                rs.owner_references()
                    .iter()
                    .find(|o| o.kind == "Deployment")
                    .map(|d| workload(WorkloadKind::Deployment, &d.name))
            }),
        "StatefulSet" => Some(workload(WorkloadKind::StatefulSet, &owner.name)),
        "DaemonSet" => Some(workload(WorkloadKind::DaemonSet, &owner.name)),
        _ => None,
    })
}

fn proxy_image(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == ISTIO_PROXY_CONTAINER)?
        .image
        .as_deref()
}

/// Restarts every workload running an Istio proxy other than `expected`.
pub async fn restart_outdated_sidecars(
    client: &dyn KubeClient,
    expected: &str,
    version: &str,
) -> Result<usize, OperatorError> {
    let mut outdated = Vec::new();
    for pod in k8s::list::<Pod>(client, None, None).await? {
        match proxy_image(&pod) {
            Some(image) if image != expected => {}
            _ => continue,
        }
        if let Some(w) = pod_owner(client, &pod).await? {
            if !outdated.contains(&w) {
                outdated.push(w);
            }
        }
    }
    let mut restarted = 0;
    for w in &outdated {
        if restart_workload(client, w, version).await? {
            restarted += 1;
        }
    }
    if !outdated.is_empty() {
        info!(outdated = outdated.len(), restarted, "outdated istio proxies handled");
    }
    Ok(restarted)
}

/// Restarts the workloads of user namespaces with sidecar injection so
/// their proxies pick up the upgraded mesh.
pub async fn restart_applications(
    client: &dyn KubeClient,
    registry: &Registry,
    system_ns: &str,
    version: &str,
) -> Result<usize, OperatorError> {
    let platform_namespaces: HashSet<&str> = registry
        .iter()
        .map(|c| c.namespace())
        .chain([system_ns])
        .collect();
    let selector = format!("{ISTIO_INJECTION_LABEL}=enabled");
    let mut restarted = 0;
    for ns in k8s::list::<Namespace>(client, None, Some(&selector)).await? {
        let name = ns.name_any();
        if platform_namespaces.contains(name.as_str())
            || ns.labels().contains_key(NAMESPACE_LABEL)
        {
            continue;
        }
        let mut workloads = Vec::new();
        for n in names(k8s::list::<Deployment>(client, Some(&name), None).await?) {
            workloads.push((WorkloadKind::Deployment, n));
        }
        for n in names(k8s::list::<StatefulSet>(client, Some(&name), None).await?) {
            workloads.push((WorkloadKind::StatefulSet, n));
        }
        for n in names(k8s::list::<DaemonSet>(client, Some(&name), None).await?) {
            workloads.push((WorkloadKind::DaemonSet, n));
        }
        for (kind, workload) in workloads {
            let w = WorkloadRef {
                kind,
                namespace: name.clone(),
                name: workload,
            };
            if restart_workload(client, &w, version).await? {
                restarted += 1;
            }
        }
    }
    Ok(restarted)
}

fn names<K: Resource>(objs: Vec<K>) -> Vec<String> {
    objs.iter().filter_map(|o| o.meta().name.clone()).collect()
}
