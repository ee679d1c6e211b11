//! Prometheus probes: PromQL queries, active alerts, and scrape targets.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::loki::parse_time_range;
use super::{parse_inputs, Category, Descriptor, HttpAuth, InputMap, Outcome, OutcomeMetadata, Probe};

/// Connection settings for the Prometheus HTTP API, from configuration.
#[derive(Debug, Clone)]
pub struct PrometheusClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub auth: HttpAuth,
}

impl Default for PrometheusClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://prometheus.monitoring.svc.cluster.local:9090".to_string(),
            timeout: Duration::from_secs(30),
            auth: HttpAuth::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Thin client over the Prometheus v1 HTTP API.
pub struct PrometheusClient {
    client: reqwest::Client,
    config: PrometheusClientConfig,
}

impl PrometheusClient {
    pub fn new(config: PrometheusClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(config.auth.headers()?)
            .build()
            .context("Failed to build Prometheus HTTP client")?;
        Ok(Self { client, config })
    }

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<(Value, String)> {
        let url = format!("{}{path}", self.config.base_url);
        debug!(path, "Querying Prometheus");
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .context("Prometheus request failed")?;

        let request_url = response.url().to_string();
        if !response.status().is_success() {
            anyhow::bail!("Prometheus returned HTTP {}", response.status());
        }

        let body: PromResponse = response
            .json()
            .await
            .context("Failed to parse Prometheus response")?;
        if body.status != "success" {
            anyhow::bail!(
                "Prometheus query failed: {}",
                body.error.unwrap_or_else(|| body.status)
            );
        }
        Ok((body.data, request_url))
    }
}

/// PromQL query probe, instant or range.
pub struct PrometheusQueryProbe {
    descriptor: Descriptor,
    client: PrometheusClient,
}

#[derive(Debug, Deserialize)]
struct PromQueryInputs {
    query: String,
    #[serde(default)]
    query_type: Option<String>,
    #[serde(default)]
    time_range: Option<String>,
    #[serde(default)]
    step: Option<String>,
}

impl PrometheusQueryProbe {
    pub fn new(config: PrometheusClientConfig) -> Result<Self> {
        Ok(Self {
            descriptor: Descriptor::new(
                "prometheus_query",
                "Prometheus Metrics Query",
                "Execute PromQL queries, e.g. 'rate(http_requests_total{status=~\"5..\"}[5m])'",
                &[
                    ("query", "PromQL query string"),
                    (
                        "query_type",
                        "Query type: 'instant' or 'range' (optional, defaults to 'instant')",
                    ),
                    (
                        "time_range",
                        "Range query window, e.g. '1h' (optional, defaults to '1h')",
                    ),
                    ("step", "Range query resolution, e.g. '1m' (optional, defaults to '1m')"),
                ],
                Category::Metrics,
            ),
            client: PrometheusClient::new(config)?,
        })
    }
}

#[async_trait]
impl Probe for PrometheusQueryProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: PromQueryInputs = parse_inputs(inputs)?;
        let query_type = inputs.query_type.as_deref().unwrap_or("instant");

        let (data, request_url) = if query_type == "range" {
            let range = parse_time_range(inputs.time_range.as_deref().unwrap_or("1h"))?;
            let end = Utc::now();
            let start = end - range;
            let start_s = start.timestamp().to_string();
            let end_s = end.timestamp().to_string();
            let step = inputs.step.as_deref().unwrap_or("1m");
            self.client
                .get(
                    "/api/v1/query_range",
                    &[
                        ("query", inputs.query.as_str()),
                        ("start", start_s.as_str()),
                        ("end", end_s.as_str()),
                        ("step", step),
                    ],
                )
                .await?
        } else {
            self.client
                .get("/api/v1/query", &[("query", inputs.query.as_str())])
                .await?
        };

        let result_type = data
            .get("resultType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let result = data.get("result").cloned().unwrap_or(Value::Array(Vec::new()));
        let series_count = result.as_array().map_or(0, Vec::len);

        Ok(Outcome::ok_with_metadata(
            json!({
                "query": inputs.query,
                "query_type": query_type,
                "result_type": result_type,
                "series_count": series_count,
                "result": result,
            }),
            OutcomeMetadata::for_command(request_url),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct AlertsData {
    #[serde(default)]
    alerts: Vec<AlertDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertDoc {
    #[serde(default)]
    labels: serde_json::Map<String, Value>,
    #[serde(default)]
    annotations: serde_json::Map<String, Value>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    active_at: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// Active alerts probe with state and severity filtering.
pub struct PrometheusAlertsProbe {
    descriptor: Descriptor,
    client: PrometheusClient,
}

#[derive(Debug, Deserialize)]
struct AlertsInputs {
    #[serde(default)]
    state_filter: Option<String>,
    #[serde(default)]
    severity_filter: Option<String>,
}

impl PrometheusAlertsProbe {
    pub fn new(config: PrometheusClientConfig) -> Result<Self> {
        Ok(Self {
            descriptor: Descriptor::new(
                "prometheus_alerts",
                "Prometheus Active Alerts",
                "List currently firing and pending alerts with their labels and annotations",
                &[
                    (
                        "state_filter",
                        "Filter by state: 'firing', 'pending', or 'all' (optional, defaults to 'all')",
                    ),
                    (
                        "severity_filter",
                        "Filter by severity label, e.g. 'critical' (optional)",
                    ),
                ],
                Category::Alerts,
            ),
            client: PrometheusClient::new(config)?,
        })
    }
}

#[async_trait]
impl Probe for PrometheusAlertsProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: AlertsInputs = parse_inputs(inputs)?;
        let state_filter = inputs.state_filter.as_deref().unwrap_or("all");

        let (data, request_url) = self.client.get("/api/v1/alerts", &[]).await?;
        let alerts: AlertsData =
            serde_json::from_value(data).context("Unexpected alerts payload")?;

        let filtered: Vec<Value> = alerts
            .alerts
            .into_iter()
            .filter(|a| state_filter == "all" || a.state == state_filter)
            .filter(|a| match &inputs.severity_filter {
                Some(severity) => a
                    .labels
                    .get("severity")
                    .and_then(Value::as_str)
                    .is_some_and(|s| s == severity),
                None => true,
            })
            .map(|a| {
                json!({
                    "name": a.labels.get("alertname").cloned().unwrap_or_default(),
                    "state": a.state,
                    "labels": a.labels,
                    "annotations": a.annotations,
                    "active_at": a.active_at,
                    "value": a.value,
                })
            })
            .collect();

        Ok(Outcome::ok_with_metadata(
            json!({
                "total_alerts": filtered.len(),
                "alerts": filtered,
            }),
            OutcomeMetadata::for_command(request_url),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetsData {
    #[serde(default)]
    active_targets: Vec<TargetDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDoc {
    #[serde(default)]
    labels: serde_json::Map<String, Value>,
    #[serde(default)]
    health: String,
    #[serde(default)]
    scrape_url: String,
    #[serde(default)]
    last_error: String,
    #[serde(default)]
    last_scrape: Option<String>,
}

/// Scrape target health probe.
pub struct PrometheusTargetsProbe {
    descriptor: Descriptor,
    client: PrometheusClient,
}

#[derive(Debug, Deserialize)]
struct TargetsInputs {
    #[serde(default)]
    state_filter: Option<String>,
}

impl PrometheusTargetsProbe {
    pub fn new(config: PrometheusClientConfig) -> Result<Self> {
        Ok(Self {
            descriptor: Descriptor::new(
                "prometheus_targets",
                "Prometheus Scrape Targets",
                "Check scrape target health to spot services that stopped exposing metrics",
                &[(
                    "state_filter",
                    "Filter by health: 'up', 'down', or 'all' (optional, defaults to 'all')",
                )],
                Category::Metrics,
            ),
            client: PrometheusClient::new(config)?,
        })
    }
}

#[async_trait]
impl Probe for PrometheusTargetsProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: TargetsInputs = parse_inputs(inputs)?;
        let state_filter = inputs.state_filter.as_deref().unwrap_or("all");

        let (data, request_url) = self.client.get("/api/v1/targets", &[]).await?;
        let targets: TargetsData =
            serde_json::from_value(data).context("Unexpected targets payload")?;

        let total = targets.active_targets.len();
        let down = targets
            .active_targets
            .iter()
            .filter(|t| t.health == "down")
            .count();

        let filtered: Vec<Value> = targets
            .active_targets
            .into_iter()
            .filter(|t| state_filter == "all" || t.health == state_filter)
            .map(|t| {
                json!({
                    "job": t.labels.get("job").cloned().unwrap_or_default(),
                    "instance": t.labels.get("instance").cloned().unwrap_or_default(),
                    "health": t.health,
                    "scrape_url": t.scrape_url,
                    "last_error": t.last_error,
                    "last_scrape": t.last_scrape,
                })
            })
            .collect();

        Ok(Outcome::ok_with_metadata(
            json!({
                "total_targets": total,
                "down_targets": down,
                "targets": filtered,
            }),
            OutcomeMetadata::for_command(request_url),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_alerts_payload() {
        let data: AlertsData = serde_json::from_str(
            r#"{
                "alerts": [
                    {
                        "labels": {"alertname": "HighErrorRate", "severity": "critical"},
                        "annotations": {"summary": "5xx spike"},
                        "state": "firing",
                        "activeAt": "2026-08-20T10:00:00Z",
                        "value": "0.23"
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(data.alerts.len(), 1);
        assert_eq!(data.alerts[0].state, "firing");
        assert_eq!(data.alerts[0].labels["severity"], "critical");
    }

    #[test]
    fn deserializes_targets_payload() {
        let data: TargetsData = serde_json::from_str(
            r#"{
                "activeTargets": [
                    {
                        "labels": {"job": "checkout", "instance": "10.0.0.5:8080"},
                        "health": "down",
                        "scrapeUrl": "http://10.0.0.5:8080/metrics",
                        "lastError": "connection refused"
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(data.active_targets.len(), 1);
        assert_eq!(data.active_targets[0].health, "down");
    }

    #[test]
    fn prom_error_response_carries_message() {
        let body: PromResponse = serde_json::from_str(
            r#"{"status":"error","error":"parse error at char 3","data":null}"#,
        )
        .unwrap();
        assert_eq!(body.status, "error");
        assert_eq!(body.error.as_deref(), Some("parse error at char 3"));
    }
}
