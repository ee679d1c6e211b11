//! Probe contract shared by every diagnostic data source.
//!
//! A probe is one diagnostic capability (query cluster events, run a PromQL
//! query, analyze git history). Every probe exposes a static [`Descriptor`]
//! and an async `execute` that turns a loose input map into a uniform
//! [`Outcome`]. Dispatch and input validation live in [`catalog`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub mod catalog;
pub mod connectivity;
pub mod exec;
pub mod git;
pub mod health;
pub mod kubectl;
pub mod logs;
pub mod loki;
pub mod prometheus;

pub use catalog::Catalog;

/// Loose string-keyed inputs as produced by the planning oracle.
///
/// Probes must parse this into a strongly typed input struct before use;
/// the loose map only exists at the dispatch boundary.
pub type InputMap = serde_json::Map<String, Value>;

/// Credentials for HTTP data sources (Loki, Prometheus).
///
/// A bearer token takes precedence over basic credentials when both are
/// configured.
#[derive(Debug, Clone, Default)]
pub struct HttpAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl HttpAuth {
    /// The `Authorization` header value, if any credentials are set.
    #[must_use]
    pub fn authorization_header(&self) -> Option<String> {
        use base64::Engine as _;

        if let Some(token) = &self.token {
            return Some(format!("Bearer {token}"));
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                Some(format!("Basic {encoded}"))
            }
            _ => None,
        }
    }

    /// A reqwest header map carrying the authorization header, for client
    /// construction.
    pub fn headers(&self) -> anyhow::Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(value) = self.authorization_header() {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&value)
                    .map_err(|e| anyhow::anyhow!("invalid credential characters: {e}"))?,
            );
        }
        Ok(headers)
    }
}

/// Category tag used by the planner to group probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Logs,
    Metrics,
    Health,
    Code,
    Alerts,
}

/// Static identity of a probe, created once at registration time.
///
/// The `inputs` map goes from parameter name to human-readable constraint
/// text; a parameter whose constraint text contains "optional" is not
/// required at dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct Descriptor {
    /// Unique probe id used for dispatch (e.g. `kubectl_events`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text description shown to the planning oracle.
    pub description: String,
    /// Input parameter name -> constraint text.
    pub inputs: BTreeMap<String, String>,
    /// Category tag.
    pub category: Category,
}

impl Descriptor {
    pub fn new(
        id: &str,
        name: &str,
        description: &str,
        inputs: &[(&str, &str)],
        category: Category,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            inputs: inputs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            category,
        }
    }

    /// Names of parameters whose constraint text does not mark them optional.
    #[must_use]
    pub fn required_inputs(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .filter(|(_, constraint)| !constraint.to_lowercase().contains("optional"))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Execution metadata attached to successful outcomes: when the query ran
/// and the literal external command or URL that was issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeMetadata {
    pub query_time: DateTime<Utc>,
    /// The external command line or request URL, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl OutcomeMetadata {
    #[must_use]
    pub fn for_command(command: impl Into<String>) -> Self {
        Self {
            query_time: Utc::now(),
            command: Some(command.into()),
        }
    }
}

/// Uniform result of executing a probe.
///
/// Consumers must branch on `success`; payload shape is never a status
/// signal. `error` is set iff `success` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<OutcomeMetadata>,
}

impl Outcome {
    #[must_use]
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn ok_with_metadata(payload: Value, metadata: OutcomeMetadata) -> Self {
        Self {
            success: true,
            payload,
            error: None,
            metadata: Some(metadata),
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Value::Null,
            error: Some(message.into()),
            metadata: None,
        }
    }
}

/// Trait implemented by every diagnostic probe.
///
/// Probes own their configuration (URLs, credentials, repo paths), captured
/// at construction and immutable afterwards. Constructors perform their own
/// validation and may refuse to build. An `Err` from `execute` is treated as
/// a fault by the catalog and converted into a failed [`Outcome`]; probes
/// are free to return either shape for expected external failures.
#[async_trait]
pub trait Probe: Send + Sync {
    fn descriptor(&self) -> &Descriptor;

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome>;
}

/// Required parameters missing from `inputs`, in descriptor order.
///
/// Pure function of the descriptor and the input map; runs identically for
/// every probe and has no side effects.
#[must_use]
pub fn missing_required_inputs(descriptor: &Descriptor, inputs: &InputMap) -> Vec<String> {
    descriptor
        .required_inputs()
        .into_iter()
        .filter(|name| !inputs.contains_key(*name))
        .map(ToString::to_string)
        .collect()
}

/// Parse a loose input map into a probe's typed input struct.
pub fn parse_inputs<T: for<'de> Deserialize<'de>>(inputs: &InputMap) -> anyhow::Result<T> {
    serde_json::from_value(Value::Object(inputs.clone()))
        .map_err(|e| anyhow::anyhow!("invalid probe inputs: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> Descriptor {
        Descriptor::new(
            "sample",
            "Sample",
            "A sample probe",
            &[
                ("service_name", "Name of the service to inspect"),
                ("namespace", "Kubernetes namespace (optional, defaults to 'default')"),
                ("limit", "Maximum results (Optional)"),
            ],
            Category::Health,
        )
    }

    #[test]
    fn required_inputs_skip_optional_markers() {
        let desc = descriptor();
        assert_eq!(desc.required_inputs(), vec!["service_name"]);
    }

    #[test]
    fn missing_required_detected() {
        let desc = descriptor();
        let empty = InputMap::new();
        assert_eq!(missing_required_inputs(&desc, &empty), vec!["service_name"]);

        let mut inputs = InputMap::new();
        inputs.insert("service_name".into(), json!("checkout"));
        assert!(missing_required_inputs(&desc, &inputs).is_empty());
    }

    #[test]
    fn auth_header_prefers_bearer_token() {
        let auth = HttpAuth {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            token: Some("abc123".to_string()),
        };
        assert_eq!(
            auth.authorization_header().as_deref(),
            Some("Bearer abc123")
        );
    }

    #[test]
    fn auth_header_basic_encoding() {
        let auth = HttpAuth {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            token: None,
        };
        assert_eq!(
            auth.authorization_header().as_deref(),
            Some("Basic dXNlcjpwYXNz")
        );
        assert!(HttpAuth::default().authorization_header().is_none());
        assert!(HttpAuth::default().headers().unwrap().is_empty());
    }

    #[test]
    fn outcome_invariants() {
        let ok = Outcome::ok(json!({"answer": 42}));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = Outcome::failure("boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.payload.is_null());
    }

    #[test]
    fn parse_inputs_into_typed_struct() {
        #[derive(Deserialize)]
        struct Typed {
            service_name: String,
            #[serde(default)]
            limit: Option<u32>,
        }

        let mut inputs = InputMap::new();
        inputs.insert("service_name".into(), json!("cart"));
        let typed: Typed = parse_inputs(&inputs).unwrap();
        assert_eq!(typed.service_name, "cart");
        assert!(typed.limit.is_none());
    }
}
