use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::client::GrafanaClient;

/// Incident and OnCall both ship inside the IRM app.
pub const IRM_PLUGIN_ID: &str = "grafana-irm-app";
/// Sift investigations are served by the machine learning app.
pub const SIFT_PLUGIN_ID: &str = "grafana-ml-app";
pub const ASSERTS_PLUGIN_ID: &str = "grafana-asserts-app";

/// Optional integrations a Grafana instance may or may not provide. Tools
/// gated on a capability are hidden when it is absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Prometheus,
    Loki,
    Pyroscope,
    Incident,
    OnCall,
    Sift,
    Asserts,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Self::Prometheus,
        Self::Loki,
        Self::Pyroscope,
        Self::Incident,
        Self::OnCall,
        Self::Sift,
        Self::Asserts,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prometheus => "prometheus",
            Self::Loki => "loki",
            Self::Pyroscope => "pyroscope",
            Self::Incident => "incident",
            Self::OnCall => "oncall",
            Self::Sift => "sift",
            Self::Asserts => "asserts",
        }
    }
}

/// Raw inventory of an instance: datasource types and installed plugin ids,
/// trimmed and lower-cased.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CapabilitySet {
    pub datasource_types: BTreeSet<String>,
    pub plugin_ids: BTreeSet<String>,
}

impl CapabilitySet {
    pub fn new<D, P>(datasource_types: D, plugin_ids: P) -> Self
    where
        D: IntoIterator,
        D::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let normalize = |raw: &str| raw.trim().to_ascii_lowercase();
        Self {
            datasource_types: datasource_types
                .into_iter()
                .map(|t| normalize(t.as_ref()))
                .filter(|t| !t.is_empty())
                .collect(),
            plugin_ids: plugin_ids
                .into_iter()
                .map(|p| normalize(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    fn has_datasource_like(&self, needles: &[&str]) -> bool {
        self.datasource_types
            .iter()
            .any(|ty| needles.iter().any(|needle| ty.contains(needle)))
    }

    fn has_plugin(&self, ids: &[&str]) -> bool {
        ids.iter().any(|id| self.plugin_ids.contains(*id))
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Prometheus => self.has_datasource_like(&["prometheus"]),
            Capability::Loki => self.has_datasource_like(&["loki"]),
            Capability::Pyroscope => self.has_datasource_like(&["pyroscope", "phlare"]),
            Capability::Incident | Capability::OnCall => self.has_plugin(&[IRM_PLUGIN_ID]),
            Capability::Sift => self.has_plugin(&[SIFT_PLUGIN_ID]),
            Capability::Asserts => self.has_plugin(&[ASSERTS_PLUGIN_ID]),
        }
    }

    pub fn available(&self) -> BTreeSet<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|capability| self.has(*capability))
            .collect()
    }
}

/// Inventory the instance. Both listings run concurrently; a failed listing
/// contributes nothing rather than failing startup.
pub async fn detect(client: &GrafanaClient) -> CapabilitySet {
    let (datasources, plugins) = tokio::join!(
        client.get_json("/datasources", &[]),
        client.get_json("/plugins", &[]),
    );

    let datasource_types = match datasources {
        Ok(body) => collect_field(&body, "type"),
        Err(err) => {
            tracing::warn!(event = "capabilities.datasources_failed", error = %err, "datasource listing failed; datasource-backed tools hidden");
            Vec::new()
        }
    };
    let plugin_ids = match plugins {
        Ok(body) => collect_field(&body, "id"),
        Err(err) => {
            tracing::warn!(event = "capabilities.plugins_failed", error = %err, "plugin listing failed; plugin-backed tools hidden");
            Vec::new()
        }
    };

    let set = CapabilitySet::new(datasource_types, plugin_ids);
    tracing::info!(
        event = "capabilities.detected",
        available = ?set.available(),
        datasource_types = set.datasource_types.len(),
        plugins = set.plugin_ids.len(),
        "capability detection finished"
    );
    set
}

fn collect_field(body: &Value, key: &str) -> Vec<String> {
    body.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(key).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use grafana_mcp_core::config::{Credential, RequestConfig, TlsOptions};

    use crate::client::build_http_client;

    #[test]
    fn datasource_types_match_by_substring() {
        let set = CapabilitySet::new([" Prometheus ", "grafana-pyroscope-datasource"], [""; 0]);
        assert!(set.has(Capability::Prometheus));
        assert!(set.has(Capability::Pyroscope));
        assert!(!set.has(Capability::Loki));
    }

    #[test]
    fn irm_plugin_enables_incident_and_oncall() {
        let set = CapabilitySet::new([""; 0], ["grafana-irm-app"]);
        assert_eq!(
            set.available(),
            BTreeSet::from([Capability::Incident, Capability::OnCall])
        );
    }

    #[test]
    fn standalone_oncall_plugin_is_not_enough() {
        let set = CapabilitySet::new([""; 0], ["grafana-oncall-app"]);
        assert!(!set.has(Capability::OnCall));
    }

    #[test]
    fn ml_and_asserts_plugins_enable_their_tools() {
        let set = CapabilitySet::new([""; 0], ["Grafana-ML-App", "grafana-asserts-app"]);
        assert_eq!(
            set.available(),
            BTreeSet::from([Capability::Sift, Capability::Asserts])
        );
    }

    #[test]
    fn empty_inventory_has_no_capabilities() {
        assert!(CapabilitySet::default().available().is_empty());
    }

    #[tokio::test]
    async fn detect_reads_datasources_and_plugins() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/datasources")
            .with_status(200)
            .with_body(r#"[{"uid":"p1","type":"prometheus"},{"uid":"l1","type":"loki"}]"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/plugins")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let config = RequestConfig::new(&server.url(), Credential::None, TlsOptions::default())
            .expect("config");
        let http = build_http_client(&TlsOptions::default()).expect("http");
        let client = GrafanaClient::new(http, Arc::new(config));

        let set = detect(&client).await;
        assert_eq!(
            set.available(),
            BTreeSet::from([Capability::Prometheus, Capability::Loki])
        );
        assert!(set.plugin_ids.is_empty());
    }
}
