use std::sync::Arc;

use kube::Client;
use platform_models::{Bom, Catalog};
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    config::OperatorConfig,
    controller::{ControllerContext, run_controller},
    health::HealthChecker,
    k8s::{KubeApiClient, KubeClient},
    registry::Registry,
    status::StatusUpdater,
};

/// Loads the BOM and catalog named by `cfg` and wires the shared context.
pub fn build_context(
    client: Arc<dyn KubeClient>,
    cfg: OperatorConfig,
) -> anyhow::Result<Arc<ControllerContext>> {
    let bom = Bom::from_path(&cfg.bom_path)?;
    let catalog = Catalog::from_path(&cfg.catalog_path)?;
    info!(bom_version = %bom.version(), "loaded BOM and version catalog");
    let registry = Arc::new(Registry::builtin()?);
    let updater =
        Arc::new(StatusUpdater::new(client.clone(), cfg.status_queue));
    let ctx = ControllerContext::new(
        client,
        registry,
        Arc::new(bom),
        Arc::new(catalog),
        updater,
        cfg,
    )?;
    Ok(Arc::new(ctx))
}

/// Spawn the Kubernetes controller loop.
pub fn spawn_controller(
    client: Client,
    ctx: Arc<ControllerContext>,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_controller(client, ctx).await })
}

/// The availability poller, when the configuration enables it.
pub fn health_checker(ctx: &ControllerContext) -> Option<Arc<HealthChecker>> {
    if !ctx.cfg.health_enabled() {
        info!("health checker disabled");
        return None;
    }
    Some(Arc::new(HealthChecker::new(
        ctx.client.clone(),
        ctx.registry.clone(),
        ctx.updater.clone(),
        ctx.cfg.health_interval(),
    )))
}

/// Start the status writer, health checker and controller, and wait until
/// the controller stops.
pub async fn run_all(
    client: Client,
    cfg: OperatorConfig,
) -> anyhow::Result<()> {
    let kube_client: Arc<dyn KubeClient> =
        Arc::new(KubeApiClient::new(client.clone()));
    let ctx = build_context(kube_client, cfg)?;
    ctx.updater.start().await;
    let checker = health_checker(&ctx);
    if let Some(checker) = &checker {
        checker.start().await;
    }

    let res = spawn_controller(client, ctx.clone()).await;

    if let Some(checker) = &checker {
        checker.pause().await;
    }
    ctx.updater.shutdown().await;
    res?
}
