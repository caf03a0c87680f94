use std::sync::Arc;

use async_trait::async_trait;
use platform_models::{Availability, PlatformSpec};

use super::Component;
use super::workload::{self, Workload};
use crate::error::OperatorError;
use crate::k8s::KubeClient;

/// Descriptor for a component whose lifecycle is driven by a Module.
///
/// Readiness is derived from the listed workloads. A component without
/// workloads never reports itself installed.
#[derive(Debug, Clone, Copy)]
pub struct ModuleComponent {
    pub name: &'static str,
    pub json_name: &'static str,
    pub namespace: &'static str,
    pub enabled_by_default: bool,
    pub use_module: bool,
    pub dependencies: &'static [&'static str],
    pub workloads: &'static [Workload],
}

#[async_trait]
impl Component for ModuleComponent {
    fn name(&self) -> &str {
        self.name
    }

    fn namespace(&self) -> &str {
        self.namespace
    }

    fn json_name(&self) -> &str {
        self.json_name
    }

    fn is_enabled(&self, effective: &PlatformSpec) -> bool {
        effective
            .component(self.json_name)
            .and_then(|c| c.enabled)
            .unwrap_or(self.enabled_by_default)
    }

    fn should_use_module(&self) -> bool {
        self.use_module
    }

    fn dependencies(&self) -> &[&'static str] {
        self.dependencies
    }

    async fn is_installed(
        &self,
        client: &dyn KubeClient,
    ) -> Result<bool, OperatorError> {
        workload::all_exist(client, self.workloads).await
    }

    async fn is_ready(&self, client: &dyn KubeClient) -> bool {
        !self.workloads.is_empty()
            && workload::availability(client, self.workloads).await.1
                == Availability::Available
    }

    async fn is_available(
        &self,
        client: &dyn KubeClient,
    ) -> (String, Availability) {
        workload::availability(client, self.workloads).await
    }
}

const fn module(
    name: &'static str,
    json_name: &'static str,
    namespace: &'static str,
    dependencies: &'static [&'static str],
    workloads: &'static [Workload],
) -> ModuleComponent {
    ModuleComponent {
        name,
        json_name,
        namespace,
        enabled_by_default: true,
        use_module: true,
        dependencies,
        workloads,
    }
}

const fn disabled_by_default(c: ModuleComponent) -> ModuleComponent {
    ModuleComponent {
        enabled_by_default: false,
        ..c
    }
}

const fn legacy(c: ModuleComponent) -> ModuleComponent {
    ModuleComponent {
        use_module: false,
        ..c
    }
}

const SYSTEM: &str = "platform-system";
const MONITORING: &str = "platform-monitoring";
const LOGGING: &str = "platform-logging";

const BUILTIN: &[ModuleComponent] = &[
    module("network-policies", "networkPolicies", SYSTEM, &[], &[]),
    module(
        "cert-manager",
        "certManager",
        "cert-manager",
        &[],
        &[
            Workload::deployment("cert-manager", "cert-manager"),
            Workload::deployment("cert-manager", "cert-manager-webhook"),
            Workload::deployment("cert-manager", "cert-manager-cainjector"),
        ],
    ),
    module(
        "cluster-issuer",
        "clusterIssuer",
        "cert-manager",
        &["cert-manager"],
        &[],
    ),
    disabled_by_default(module(
        "external-dns",
        "dns",
        "cert-manager",
        &["cert-manager"],
        &[Workload::deployment("cert-manager", "external-dns")],
    )),
    module(
        "istio",
        "istio",
        "istio-system",
        &["cert-manager"],
        &[
            Workload::deployment("istio-system", "istiod"),
            Workload::deployment("istio-system", "istio-ingressgateway"),
            Workload::deployment("istio-system", "istio-egressgateway"),
        ],
    ),
    module(
        "ingress-controller",
        "ingressNGINX",
        "ingress-nginx",
        &["istio"],
        &[Workload::deployment(
            "ingress-nginx",
            "ingress-controller-ingress-nginx-controller",
        )],
    ),
    module(
        "platform",
        "platform",
        SYSTEM,
        &["istio", "cert-manager"],
        &[Workload::deployment(SYSTEM, "platform-monitoring-operator")],
    ),
    module(
        "auth-proxy",
        "authProxy",
        SYSTEM,
        &["ingress-controller"],
        &[Workload::deployment(SYSTEM, "platform-authproxy")],
    ),
    module(
        "mysql-operator",
        "mysqlOperator",
        "mysql-operator",
        &[],
        &[Workload::deployment("mysql-operator", "mysql-operator")],
    ),
    module(
        "mysql",
        "mysql",
        "keycloak",
        &["mysql-operator", "istio"],
        &[Workload::stateful_set("keycloak", "mysql")],
    ),
    module(
        "keycloak",
        "keycloak",
        "keycloak",
        &["mysql", "ingress-controller", "cert-manager"],
        &[Workload::stateful_set("keycloak", "keycloak")],
    ),
    module(
        "rancher",
        "rancher",
        "cattle-system",
        &["ingress-controller", "cert-manager"],
        &[Workload::deployment("cattle-system", "rancher")],
    ),
    disabled_by_default(module(
        "rancher-backup",
        "rancherBackup",
        "cattle-resources-system",
        &["rancher"],
        &[Workload::deployment("cattle-resources-system", "rancher-backup")],
    )),
    disabled_by_default(module(
        "argocd",
        "argoCD",
        "argocd",
        &["ingress-controller", "cert-manager"],
        &[Workload::deployment("argocd", "argocd-server")],
    )),
    module(
        "prometheus-operator",
        "prometheusOperator",
        MONITORING,
        &["cert-manager"],
        &[Workload::deployment(
            MONITORING,
            "prometheus-operator-kube-p-operator",
        )],
    ),
    disabled_by_default(module(
        "prometheus-adapter",
        "prometheusAdapter",
        MONITORING,
        &["prometheus-operator"],
        &[Workload::deployment(MONITORING, "prometheus-adapter")],
    )),
    module(
        "kube-state-metrics",
        "kubeStateMetrics",
        MONITORING,
        &["prometheus-operator"],
        &[Workload::deployment(MONITORING, "kube-state-metrics")],
    ),
    disabled_by_default(module(
        "prometheus-pushgateway",
        "prometheusPushgateway",
        MONITORING,
        &["prometheus-operator"],
        &[Workload::deployment(MONITORING, "prometheus-pushgateway")],
    )),
    module(
        "prometheus-node-exporter",
        "prometheusNodeExporter",
        MONITORING,
        &["prometheus-operator"],
        &[Workload::daemon_set(MONITORING, "prometheus-node-exporter")],
    ),
    disabled_by_default(module(
        "thanos",
        "thanos",
        MONITORING,
        &["prometheus-operator"],
        &[Workload::deployment(MONITORING, "thanos-query")],
    )),
    module(
        "grafana",
        "grafana",
        SYSTEM,
        &["platform"],
        &[Workload::deployment(SYSTEM, "platform-grafana")],
    ),
    module(
        "kiali",
        "kiali",
        SYSTEM,
        &["istio"],
        &[Workload::deployment(SYSTEM, "platform-kiali")],
    ),
    disabled_by_default(module(
        "jaeger-operator",
        "jaegerOperator",
        MONITORING,
        &["cert-manager"],
        &[Workload::deployment(MONITORING, "jaeger-operator")],
    )),
    module(
        "opensearch-operator",
        "opensearchOperator",
        LOGGING,
        &["cert-manager"],
        &[Workload::deployment(
            LOGGING,
            "opensearch-operator-controller-manager",
        )],
    ),
    module(
        "opensearch",
        "opensearch",
        LOGGING,
        &["opensearch-operator"],
        &[Workload::stateful_set(LOGGING, "opensearch-master")],
    ),
    module(
        "opensearch-dashboards",
        "opensearchDashboards",
        LOGGING,
        &["opensearch"],
        &[Workload::deployment(LOGGING, "opensearch-dashboards")],
    ),
    disabled_by_default(module(
        "fluent-operator",
        "fluentOperator",
        SYSTEM,
        &[],
        &[Workload::deployment(SYSTEM, "fluent-operator")],
    )),
    module(
        "fluentd",
        "fluentd",
        SYSTEM,
        &["opensearch"],
        &[Workload::daemon_set(SYSTEM, "fluentd")],
    ),
    disabled_by_default(module(
        "velero",
        "velero",
        "velero",
        &[],
        &[Workload::deployment("velero", "velero")],
    )),
    module(
        "application-operator",
        "applicationOperator",
        SYSTEM,
        &["istio"],
        &[Workload::deployment(SYSTEM, "platform-application-operator")],
    ),
    module(
        "cluster-operator",
        "clusterOperator",
        SYSTEM,
        &["rancher"],
        &[Workload::deployment(SYSTEM, "platform-cluster-operator")],
    ),
    module(
        "cluster-api",
        "clusterAPI",
        "platform-capi",
        &["cert-manager"],
        &[Workload::deployment("platform-capi", "capi-controller-manager")],
    ),
    disabled_by_default(module(
        "dex",
        "dex",
        "dex",
        &["ingress-controller"],
        &[Workload::deployment("dex", "dex")],
    )),
    legacy(module(
        "console",
        "console",
        SYSTEM,
        &["auth-proxy"],
        &[Workload::deployment(SYSTEM, "platform-console")],
    )),
    legacy(disabled_by_default(module(
        "coherence-operator",
        "coherenceOperator",
        SYSTEM,
        &[],
        &[Workload::deployment(SYSTEM, "coherence-operator")],
    ))),
];

/// The components shipped with the operator, in reconcile order.
pub fn builtin_components() -> Vec<Arc<dyn Component>> {
    BUILTIN
        .iter()
        .map(|c| Arc::new(*c) as Arc<dyn Component>)
        .collect()
}
