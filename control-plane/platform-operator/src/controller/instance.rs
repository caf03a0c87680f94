use k8s_openapi::api::networking::v1::Ingress;
use platform_models::platform::InstanceInfo;

use crate::error::OperatorError;
use crate::k8s::{self, KubeClient};

type Setter = fn(&mut InstanceInfo, String);

const ENDPOINTS: &[(&str, &str, Setter)] = &[
    ("platform-system", "platform-ingress", |i, url| i.console_url = Some(url)),
    ("keycloak", "keycloak", |i, url| i.keycloak_url = Some(url)),
    ("cattle-system", "rancher", |i, url| i.rancher_url = Some(url)),
    ("platform-logging", "opensearch", |i, url| i.opensearch_url = Some(url)),
    ("platform-logging", "opensearch-dashboards", |i, url| i.opensearch_dashboards_url = Some(url)),
    ("platform-system", "grafana", |i, url| i.grafana_url = Some(url)),
    ("platform-monitoring", "prometheus", |i, url| i.prometheus_url = Some(url)),
    ("platform-system", "kiali", |i, url| i.kiali_url = Some(url)),
    ("platform-monitoring", "jaeger", |i, url| i.jaeger_url = Some(url)),
    ("argocd", "argocd-server", |i, url| i.argocd_url = Some(url)),
    ("platform-monitoring", "thanos-query-frontend", |i, url| i.thanos_query_url = Some(url)),
];

pub(crate) fn first_host(ingress: &Ingress) -> Option<String> {
    ingress
        .spec
        .as_ref()?
        .rules
        .as_ref()?
        .iter()
        .find_map(|r| r.host.clone())
}

/// URLs of the platform endpoints whose ingress exists.
pub async fn instance_info(client: &dyn KubeClient) -> Result<InstanceInfo, OperatorError> {
    let mut info = InstanceInfo::default();
    for &(ns, name, set) in ENDPOINTS {
        let Some(ingress) = k8s::get::<Ingress>(client, Some(ns), name).await? else {
            continue;
        };
        if let Some(host) = first_host(&ingress) {
            set(&mut info, format!("https://{host}"));
        }
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::FakeClient;
    use k8s_openapi::api::networking::v1::{IngressRule, IngressSpec};
    use kube::api::ObjectMeta;

    fn ingress(ns: &str, name: &str, host: &str) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(ns.into()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(host.into()),
                    http: None,
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test_log::test(tokio::test)]
    async fn urls_from_ingress_hosts() {
        let fake = FakeClient::new();
        fake.seed(&ingress("keycloak", "keycloak", "keycloak.example.com"));
        fake.seed(&ingress("cattle-system", "rancher", "rancher.example.com"));
        let info = instance_info(&fake).await.unwrap();
        assert_eq!(info.keycloak_url.as_deref(), Some("https://keycloak.example.com"));
        assert_eq!(info.rancher_url.as_deref(), Some("https://rancher.example.com"));
        assert_eq!(info.grafana_url, None);
    }
}
