//! Fixtures shared by unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStatus,
};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::api::ObjectMeta;
use platform_models::{
    Bom, Catalog, ComponentState, ComponentStatusDetails, Platform,
    PlatformSpec,
};

use crate::config::{HealthConfig, OperatorConfig, RequeueConfig};
use crate::controller::ControllerContext;
use crate::k8s::fake::FakeClient;
use crate::registry::{Component, ModuleComponent, Registry, Workload};
use crate::status::StatusUpdater;

pub const TEST_NS: &str = "default";

fn meta(ns: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: ns.map(str::to_string),
        ..Default::default()
    }
}

pub fn platform(name: &str) -> Platform {
    let mut p = Platform::new(name, PlatformSpec::default());
    p.metadata.namespace = Some(TEST_NS.into());
    p
}

pub fn deployment(
    ns: &str,
    name: &str,
    replicas: i32,
    ready: i32,
) -> Deployment {
    Deployment {
        metadata: meta(Some(ns), name),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            ready_replicas: Some(ready),
            ..Default::default()
        }),
    }
}

pub fn secret(ns: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: meta(Some(ns), name),
        data: Some(
            data.iter()
                .map(|(k, v)| {
                    (k.to_string(), ByteString(v.as_bytes().to_vec()))
                })
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn config_map(ns: &str, name: &str, data: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: meta(Some(ns), name),
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: meta(None, name),
        ..Default::default()
    }
}

pub fn component_status(
    name: &str,
    state: ComponentState,
) -> ComponentStatusDetails {
    ComponentStatusDetails {
        name: name.into(),
        state,
        ..Default::default()
    }
}

const ALPHA: &[Workload] = &[Workload::deployment("alpha-ns", "alpha")];
const BETA: &[Workload] = &[Workload::deployment("beta-ns", "beta")];
const GAMMA: &[Workload] = &[Workload::deployment("gamma-ns", "gamma")];

fn test_component(
    name: &'static str,
    namespace: &'static str,
    dependencies: &'static [&'static str],
    workloads: &'static [Workload],
) -> Arc<dyn Component> {
    Arc::new(ModuleComponent {
        name,
        json_name: name,
        namespace,
        enabled_by_default: true,
        use_module: true,
        dependencies,
        workloads,
    })
}

/// Three module components: alpha, beta (depends on alpha) and gamma.
pub fn test_registry() -> Registry {
    Registry::new(vec![
        test_component("alpha", "alpha-ns", &[], ALPHA),
        test_component("beta", "beta-ns", &["alpha"], BETA),
        test_component("gamma", "gamma-ns", &[], GAMMA),
    ])
    .unwrap()
}

pub fn test_catalog() -> Catalog {
    Catalog::from_yaml(
        r#"
modules:
  - name: alpha
    version: "1.0.0"
  - name: beta
    version: "1.1.0"
  - name: gamma
    version: "2.0.0"
"#,
    )
    .unwrap()
}

pub fn test_bom(version: &str) -> Bom {
    Bom::from_json(&format!(
        r#"{{
  "registry": "ghcr.io",
  "version": "{version}",
  "components": [{{
    "name": "istio",
    "subcomponents": [{{
      "name": "istiod",
      "repository": "platform",
      "images": [{{
        "image": "proxyv2",
        "tag": "1.19.0",
        "helmImageKey": "global.proxy.image"
      }}]
    }}]
  }}]
}}"#
    ))
    .unwrap()
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub const INSTALL_NS: &str = "platform-install";

pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        profile: "dev".into(),
        install_namespace: INSTALL_NS.into(),
        system_namespace: "platform-system".into(),
        bom_path: String::new(),
        catalog_path: String::new(),
        version_check: true,
        status_queue: 16,
        health: HealthConfig {
            enabled: Some(false),
            interval_secs: 30,
        },
        requeue: RequeueConfig {
            min_secs: 2,
            max_secs: 3,
            config_min_secs: 60,
            config_max_secs: 90,
        },
    }
}

/// Context over `fake` whose BOM carries `bom_version`.
pub fn test_context(
    fake: Arc<FakeClient>,
    registry: Registry,
    bom_version: &str,
) -> ControllerContext {
    let cfg = test_config();
    let updater = Arc::new(StatusUpdater::new(fake.clone(), cfg.status_queue));
    ControllerContext::new(
        fake,
        Arc::new(registry),
        Arc::new(test_bom(bom_version)),
        Arc::new(test_catalog()),
        updater,
        cfg,
    )
    .unwrap()
}
