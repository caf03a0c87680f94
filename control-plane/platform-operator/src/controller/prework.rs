//! Global preconditions run before modules are reconciled.

use k8s_openapi::ByteString;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use platform_models::PlatformSpec;
use tracing::{debug, info, warn};

use super::ControllerContext;
use crate::error::OperatorError;
use crate::k8s::{self, KubeClient, OperationResult};
use crate::registry::Registry;
use crate::result::ReconcileResult;

pub const ISTIO_INJECTION_LABEL: &str = "istio-injection";
pub const NAMESPACE_LABEL: &str = "platform.dev/namespace";

pub const KEYCLOAK_NAMESPACE: &str = "keycloak";
pub const MYSQL_BACKUP_LABEL: &str = "platform.dev/mysql-backup";

pub const REGISTRATION_SECRET: &str = "platform-cluster-registration";
pub const LOCAL_REGISTRATION_SECRET: &str = "platform-local-registration";
pub const MANAGED_CLUSTER_NAME_KEY: &str = "managed-cluster-name";
pub const LOCAL_CLUSTER_NAME: &str = "local";

pub const RANCHER_NAMESPACE: &str = "cattle-system";
pub const PLATFORM_TLS_SECRET: &str = "platform-tls";
pub const RANCHER_CA_SECRET: &str = "tls-ca";
const RANCHER_CA_KEY: &str = "cacerts.pem";

const DEFAULT_OCI_SECRET: &str = "oci";

/// Runs against the effective spec, profile defaults included.
pub async fn pre_work(
    ctx: &ControllerContext,
    effective: &PlatformSpec,
) -> ReconcileResult {
    match run(ctx, effective).await {
        Ok(()) => ReconcileResult::done(),
        Err(e) => {
            warn!(error = %e, "pre-work failed");
            ReconcileResult::from_error(e, &ctx.backoff)
        }
    }
}

async fn run(
    ctx: &ControllerContext,
    effective: &PlatformSpec,
) -> Result<(), OperatorError> {
    let client = ctx.client.as_ref();
    let system_ns = ctx.cfg.system_namespace.as_str();

    let injection = istio_injection_enabled(&ctx.registry, effective);
    ensure_system_namespace(client, system_ns, injection).await?;
    cleanup_mysql_backup_jobs(client).await?;
    check_oci_dns_secret(client, effective, &ctx.cfg.install_namespace).await?;
    sync_local_registration_secret(client, system_ns).await?;

    if ctx.registry.is_enabled("rancher", effective) {
        // failures here are retried by the next pass
        if let Err(e) = create_rancher_cert_copies(client, system_ns).await {
            warn!(error = %e, "unable to copy the platform CA for rancher");
        }
    }
    Ok(())
}

pub fn istio_injection_enabled(registry: &Registry, effective: &PlatformSpec) -> bool {
    registry.is_enabled("istio", effective)
        && effective
            .component("istio")
            .and_then(|c| c.setting_bool(&["injectionEnabled"]))
            .unwrap_or(true)
}

pub async fn ensure_system_namespace(
    client: &dyn KubeClient,
    name: &str,
    injection: bool,
) -> Result<OperationResult, OperatorError> {
    let value = if injection { "enabled" } else { "disabled" };
    let op = k8s::ensure_namespace(
        client,
        name,
        &[(NAMESPACE_LABEL, name), (ISTIO_INJECTION_LABEL, value)],
    )
    .await?;
    if op != OperationResult::Unchanged {
        info!(namespace = %name, injection, ?op, "system namespace ready");
    }
    Ok(op)
}

fn job_finished(job: &Job) -> bool {
    job.status.as_ref().is_some_and(|s| {
        s.completion_time.is_some() || s.failed.unwrap_or(0) > 0
    })
}

fn job_orphaned(job: &Job) -> bool {
    job.metadata
        .owner_references
        .as_ref()
        .is_none_or(|o| o.is_empty())
}

/// Deletes finished or ownerless MySQL backup jobs left behind in the
/// Keycloak namespace.
pub async fn cleanup_mysql_backup_jobs(
    client: &dyn KubeClient,
) -> Result<usize, OperatorError> {
    let jobs =
        k8s::list::<Job>(client, Some(KEYCLOAK_NAMESPACE), Some(MYSQL_BACKUP_LABEL)).await?;
    let mut deleted = 0;
    for job in jobs {
        if !(job_finished(&job) || job_orphaned(&job)) {
            continue;
        }
        let Some(name) = job.metadata.name.as_deref() else {
            continue;
        };
        if k8s::delete::<Job>(client, Some(KEYCLOAK_NAMESPACE), name).await? {
            info!(job = %name, "deleted leftover mysql backup job");
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// An OCI DNS setup needs its credentials secret before anything installs.
pub async fn check_oci_dns_secret(
    client: &dyn KubeClient,
    spec: &PlatformSpec,
    install_namespace: &str,
) -> Result<(), OperatorError> {
    let Some(dns) = spec.component("dns") else {
        return Ok(());
    };
    if dns.setting(&["oci"]).is_none() {
        return Ok(());
    }
    let name = dns
        .setting_str(&["oci", "secretName"])
        .unwrap_or(DEFAULT_OCI_SECRET);
    if k8s::get::<Secret>(client, Some(install_namespace), name).await?.is_none() {
        return Err(OperatorError::MissingResource {
            kind: "Secret",
            namespace: install_namespace.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Keeps the local registration secret in step with the cluster
/// registration. Without a registration this cluster registers itself as
/// `local`.
pub async fn sync_local_registration_secret(
    client: &dyn KubeClient,
    system_ns: &str,
) -> Result<OperationResult, OperatorError> {
    let data = match k8s::get::<Secret>(client, Some(system_ns), REGISTRATION_SECRET).await? {
        Some(registration) => registration.data.unwrap_or_default(),
        None => [(
            MANAGED_CLUSTER_NAME_KEY.to_string(),
            ByteString(LOCAL_CLUSTER_NAME.as_bytes().to_vec()),
        )]
        .into(),
    };
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(LOCAL_REGISTRATION_SECRET.into()),
            namespace: Some(system_ns.into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let op = k8s::create_or_update(client, secret, move |s| s.data = Some(data)).await?;
    debug!(?op, "local registration secret synced");
    Ok(op)
}

/// Copies the platform ingress CA into the secret Rancher reads its
/// private CA from.
pub async fn create_rancher_cert_copies(
    client: &dyn KubeClient,
    system_ns: &str,
) -> Result<OperationResult, OperatorError> {
    let Some(tls) = k8s::get::<Secret>(client, Some(system_ns), PLATFORM_TLS_SECRET).await?
    else {
        debug!("platform tls secret not created yet");
        return Ok(OperationResult::Unchanged);
    };
    let Some(ca) = tls.data.as_ref().and_then(|d| d.get("ca.crt")).cloned() else {
        return Ok(OperationResult::Unchanged);
    };
    k8s::ensure_namespace(client, RANCHER_NAMESPACE, &[]).await?;
    let copy = Secret {
        metadata: ObjectMeta {
            name: Some(RANCHER_CA_SECRET.into()),
            namespace: Some(RANCHER_NAMESPACE.into()),
            ..Default::default()
        },
        ..Default::default()
    };
    k8s::create_or_update(client, copy, move |s| {
        s.data
            .get_or_insert_with(Default::default)
            .insert(RANCHER_CA_KEY.into(), ca);
    })
    .await
}
