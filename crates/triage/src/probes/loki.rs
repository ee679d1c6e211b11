//! Loki probes: LogQL log queries and log-derived metric queries.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{parse_inputs, Category, Descriptor, HttpAuth, InputMap, Outcome, OutcomeMetadata, Probe};

/// Connection settings for the Loki HTTP API, from configuration.
#[derive(Debug, Clone)]
pub struct LokiClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub default_limit: u32,
    pub auth: HttpAuth,
}

impl Default for LokiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://loki.monitoring.svc.cluster.local:3100".to_string(),
            timeout: Duration::from_secs(30),
            default_limit: 100,
            auth: HttpAuth::default(),
        }
    }
}

/// Parse a relative time range like `5m`, `1h`, or `2d` into a duration.
pub fn parse_time_range(range: &str) -> Result<chrono::Duration> {
    let range = range.trim();
    let (number, unit) = range.split_at(range.len().saturating_sub(1));
    let value: i64 = number
        .parse()
        .with_context(|| format!("invalid time range '{range}'"))?;
    match unit {
        "s" => Ok(chrono::Duration::seconds(value)),
        "m" => Ok(chrono::Duration::minutes(value)),
        "h" => Ok(chrono::Duration::hours(value)),
        "d" => Ok(chrono::Duration::days(value)),
        _ => anyhow::bail!("invalid time range '{range}': expected s, m, h, or d suffix"),
    }
}

#[derive(Debug, Deserialize)]
struct LokiResponse {
    status: String,
    data: LokiData,
}

#[derive(Debug, Deserialize)]
struct LokiData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct LokiStream {
    #[serde(default)]
    stream: serde_json::Map<String, Value>,
    #[serde(default)]
    values: Vec<(String, String)>,
}

/// Thin client over the Loki query_range endpoint.
pub struct LokiClient {
    client: reqwest::Client,
    config: LokiClientConfig,
}

impl LokiClient {
    pub fn new(config: LokiClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(config.auth.headers()?)
            .build()
            .context("Failed to build Loki HTTP client")?;
        Ok(Self { client, config })
    }

    /// Issue a query_range call; `step` is only meaningful for metric queries.
    async fn query_range(
        &self,
        query: &str,
        start_ns: i64,
        end_ns: i64,
        limit: u32,
        direction: &str,
        step: Option<&str>,
    ) -> Result<(LokiResponse, String)> {
        let url = format!("{}/loki/api/v1/query_range", self.config.base_url);
        let start = start_ns.to_string();
        let end = end_ns.to_string();
        let limit_str = limit.to_string();
        let mut params = vec![
            ("query", query),
            ("start", start.as_str()),
            ("end", end.as_str()),
            ("limit", limit_str.as_str()),
            ("direction", direction),
        ];
        if let Some(step) = step {
            params.push(("step", step));
        }

        debug!(query, "Querying Loki");
        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .context("Loki request failed")?;

        let request_url = response.url().to_string();
        if !response.status().is_success() {
            anyhow::bail!("Loki returned HTTP {}", response.status());
        }

        let body: LokiResponse = response
            .json()
            .await
            .context("Failed to parse Loki response")?;
        if body.status != "success" {
            anyhow::bail!("Loki query failed with status '{}'", body.status);
        }
        Ok((body, request_url))
    }
}

/// Log stream query probe.
pub struct LokiLogsProbe {
    descriptor: Descriptor,
    client: LokiClient,
}

#[derive(Debug, Deserialize)]
struct LokiLogsInputs {
    query: String,
    #[serde(default)]
    time_range: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    direction: Option<String>,
}

impl LokiLogsProbe {
    pub fn new(config: LokiClientConfig) -> Result<Self> {
        Ok(Self {
            descriptor: Descriptor::new(
                "loki_logs",
                "Loki Log Query",
                "Query aggregated logs with LogQL, e.g. '{app=\"checkout\"} |= \"error\"'",
                &[
                    ("query", "LogQL query string"),
                    ("time_range", "Relative time range, e.g. '5m', '1h', '2d' (optional, defaults to '1h')"),
                    ("limit", "Maximum number of log lines (optional, defaults to 100)"),
                    (
                        "direction",
                        "Sort direction: 'forward' or 'backward' (optional, defaults to 'backward')",
                    ),
                ],
                Category::Logs,
            ),
            client: LokiClient::new(config)?,
        })
    }
}

#[async_trait]
impl Probe for LokiLogsProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: LokiLogsInputs = parse_inputs(inputs)?;
        let range = parse_time_range(inputs.time_range.as_deref().unwrap_or("1h"))?;
        let limit = inputs.limit.unwrap_or(self.client.config.default_limit);
        let direction = inputs.direction.as_deref().unwrap_or("backward");

        let end = Utc::now();
        let start = end - range;
        let (body, request_url) = self
            .client
            .query_range(
                &inputs.query,
                start.timestamp_nanos_opt().unwrap_or(0),
                end.timestamp_nanos_opt().unwrap_or(0),
                limit,
                direction,
                None,
            )
            .await?;

        let mut entries = Vec::new();
        for raw in &body.data.result {
            let stream: LokiStream = serde_json::from_value(raw.clone())
                .context("Unexpected Loki stream shape")?;
            for (ts, line) in &stream.values {
                entries.push(json!({
                    "timestamp": ts,
                    "line": line,
                    "labels": stream.stream.clone(),
                }));
            }
        }

        Ok(Outcome::ok_with_metadata(
            json!({
                "query": inputs.query,
                "result_type": body.data.result_type,
                "total_entries": entries.len(),
                "entries": entries,
            }),
            OutcomeMetadata::for_command(request_url),
        ))
    }
}

/// Log-derived metric query probe (rate, count_over_time, and friends).
pub struct LokiMetricsProbe {
    descriptor: Descriptor,
    client: LokiClient,
}

#[derive(Debug, Deserialize)]
struct LokiMetricsInputs {
    query: String,
    #[serde(default)]
    time_range: Option<String>,
    #[serde(default)]
    step: Option<String>,
}

impl LokiMetricsProbe {
    pub fn new(config: LokiClientConfig) -> Result<Self> {
        Ok(Self {
            descriptor: Descriptor::new(
                "loki_metrics",
                "Loki Metric Query",
                "Run metric queries over logs, e.g. 'rate({app=\"checkout\"} |= \"error\" [5m])'",
                &[
                    ("query", "LogQL metric query string"),
                    ("time_range", "Relative time range, e.g. '5m', '1h' (optional, defaults to '1h')"),
                    ("step", "Query resolution step, e.g. '1m' (optional, defaults to '1m')"),
                ],
                Category::Metrics,
            ),
            client: LokiClient::new(config)?,
        })
    }
}

#[async_trait]
impl Probe for LokiMetricsProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: LokiMetricsInputs = parse_inputs(inputs)?;
        let range = parse_time_range(inputs.time_range.as_deref().unwrap_or("1h"))?;
        let step = inputs.step.as_deref().unwrap_or("1m");

        let end = Utc::now();
        let start = end - range;
        let (body, request_url) = self
            .client
            .query_range(
                &inputs.query,
                start.timestamp_nanos_opt().unwrap_or(0),
                end.timestamp_nanos_opt().unwrap_or(0),
                self.client.config.default_limit,
                "backward",
                Some(step),
            )
            .await?;

        Ok(Outcome::ok_with_metadata(
            json!({
                "query": inputs.query,
                "result_type": body.data.result_type,
                "series": body.data.result,
            }),
            OutcomeMetadata::for_command(request_url),
        ))
    }
}
