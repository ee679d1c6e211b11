//! Kubectl probes: raw cluster inspection and event triage.
//!
//! `kubectl_command` is a passthrough for deep inspection; `kubectl_events`
//! pulls recent events and classifies abnormal ones into a fixed set of
//! issue buckets (resource exhaustion, probe failures, image pulls,
//! networking, restart loops).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::exec::{render_command, run_command};
use super::{parse_inputs, Category, Descriptor, InputMap, Outcome, OutcomeMetadata, Probe};

/// JSON payloads above this size are summarized instead of returned whole,
/// to keep the planner context bounded.
const JSON_TRUNCATE_BYTES: usize = 10_000;

fn default_namespace() -> String {
    "default".to_string()
}

// ---------------------------------------------------------------------------
// kubectl_command
// ---------------------------------------------------------------------------

/// Raw kubectl command execution probe.
pub struct KubectlCommandProbe {
    descriptor: Descriptor,
}

#[derive(Debug, Deserialize)]
struct KubectlCommandInputs {
    command: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    output_format: Option<String>,
    #[serde(default)]
    additional_flags: Option<String>,
}

impl KubectlCommandProbe {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            descriptor: Descriptor::new(
                "kubectl_command",
                "Kubectl Command Execution",
                "Execute kubectl commands directly for deep cluster inspection and verification",
                &[
                    (
                        "command",
                        "kubectl subcommand to execute (e.g., 'describe pod', 'get events', 'top nodes')",
                    ),
                    ("namespace", "Kubernetes namespace (optional, defaults to 'default')"),
                    (
                        "output_format",
                        "Output format: 'json', 'yaml', or 'text' (optional, defaults to 'text')",
                    ),
                    ("additional_flags", "Additional kubectl flags (optional)"),
                ],
                Category::Health,
            ),
        })
    }
}

#[async_trait]
impl Probe for KubectlCommandProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: KubectlCommandInputs = parse_inputs(inputs)?;
        let output_format = inputs.output_format.as_deref().unwrap_or("text");

        let mut args: Vec<String> = inputs
            .command
            .split_whitespace()
            .map(ToString::to_string)
            .collect();

        let has_namespace_flag =
            inputs.command.contains("--namespace") || inputs.command.contains("-n ");
        if !has_namespace_flag && inputs.namespace != "default" {
            args.push("--namespace".to_string());
            args.push(inputs.namespace.clone());
        }

        if matches!(output_format, "json" | "yaml") && !inputs.command.contains("-o ") {
            args.push("-o".to_string());
            args.push(output_format.to_string());
        }

        if let Some(flags) = &inputs.additional_flags {
            args.extend(flags.split_whitespace().map(ToString::to_string));
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let command_line = render_command("kubectl", &arg_refs);
        let output = run_command("kubectl", &arg_refs).await?;

        if !output.success {
            return Ok(Outcome::failure(format!(
                "kubectl command failed: {}",
                output.stderr.trim()
            )));
        }

        let stdout = output.stdout.trim().to_string();
        let metadata = OutcomeMetadata::for_command(command_line.clone());

        if output_format == "json" && !stdout.is_empty() {
            if let Ok(parsed) = serde_json::from_str::<Value>(&stdout) {
                let payload = if stdout.len() > JSON_TRUNCATE_BYTES {
                    summarize_large_json(&command_line, &parsed, stdout.len())
                } else {
                    json!({
                        "command": command_line,
                        "output": parsed,
                    })
                };
                return Ok(Outcome::ok_with_metadata(payload, metadata));
            }
        }

        let lines: Vec<&str> = if stdout.is_empty() {
            Vec::new()
        } else {
            stdout.lines().collect()
        };

        Ok(Outcome::ok_with_metadata(
            json!({
                "command": command_line,
                "output": stdout,
                "lines": lines,
            }),
            metadata,
        ))
    }
}

/// Keep the first few items of a large list response plus counts.
fn summarize_large_json(command: &str, parsed: &Value, original_len: usize) -> Value {
    let items = parsed.get("items").and_then(Value::as_array);
    let summary = match items {
        Some(items) => json!({
            "truncated": true,
            "total_items": items.len(),
            "sample_items": items.iter().take(3).collect::<Vec<_>>(),
        }),
        None => json!({
            "truncated": true,
            "total_items": 0,
            "sample_items": parsed,
        }),
    };
    json!({
        "command": command,
        "output": summary,
        "note": format!("Output truncated (original size: {original_len} chars, showing first 3 items)"),
    })
}

// ---------------------------------------------------------------------------
// kubectl_events and event triage
// ---------------------------------------------------------------------------

/// A cluster event reduced to the fields triage cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub reason: String,
    pub message: String,
    /// "Kind/name" of the involved object.
    pub object: String,
    pub namespace: String,
}

impl ClusterEvent {
    /// Only abnormal events are eligible for bucketing.
    #[must_use]
    pub fn is_abnormal(&self) -> bool {
        self.event_type == "Warning"
    }
}

/// Fixed issue buckets for abnormal events, in matching priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueBucket {
    ResourceExhaustion,
    ProbeFailure,
    ImagePullFailure,
    NetworkingFailure,
    RestartLoop,
}

impl IssueBucket {
    pub const ALL: [IssueBucket; 5] = [
        IssueBucket::ResourceExhaustion,
        IssueBucket::ProbeFailure,
        IssueBucket::ImagePullFailure,
        IssueBucket::NetworkingFailure,
        IssueBucket::RestartLoop,
    ];

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            IssueBucket::ResourceExhaustion => "resource_exhaustion",
            IssueBucket::ProbeFailure => "probe_failures",
            IssueBucket::ImagePullFailure => "image_pull_failures",
            IssueBucket::NetworkingFailure => "networking_failures",
            IssueBucket::RestartLoop => "restart_loops",
        }
    }
}

const NETWORK_KEYWORDS: &[&str] = &["connection refused", "timeout", "network", "dns"];

/// Classify one event into at most one bucket; first match wins.
///
/// Normal-severity events are never bucketed. Matching is case-insensitive
/// against the reason code and message fragments.
#[must_use]
pub fn classify_event(event: &ClusterEvent) -> Option<IssueBucket> {
    if !event.is_abnormal() {
        return None;
    }

    let reason = event.reason.to_lowercase();
    let message = event.message.to_lowercase();

    if reason.contains("oomkilled") {
        Some(IssueBucket::ResourceExhaustion)
    } else if message.contains("probe failed") || reason.contains("unhealthy") {
        Some(IssueBucket::ProbeFailure)
    } else if reason.contains("imagepull") || reason.contains("errimagepull") {
        Some(IssueBucket::ImagePullFailure)
    } else if NETWORK_KEYWORDS.iter().any(|kw| message.contains(kw)) {
        Some(IssueBucket::NetworkingFailure)
    } else if reason.contains("backoff") || reason.contains("crashloop") {
        Some(IssueBucket::RestartLoop)
    } else {
        None
    }
}

/// Per-bucket triage over a list of events.
#[derive(Debug, Clone, Serialize)]
pub struct EventTriage {
    pub resource_exhaustion: Vec<ClusterEvent>,
    pub probe_failures: Vec<ClusterEvent>,
    pub image_pull_failures: Vec<ClusterEvent>,
    pub networking_failures: Vec<ClusterEvent>,
    pub restart_loops: Vec<ClusterEvent>,
}

impl EventTriage {
    fn bucket_mut(&mut self, bucket: IssueBucket) -> &mut Vec<ClusterEvent> {
        match bucket {
            IssueBucket::ResourceExhaustion => &mut self.resource_exhaustion,
            IssueBucket::ProbeFailure => &mut self.probe_failures,
            IssueBucket::ImagePullFailure => &mut self.image_pull_failures,
            IssueBucket::NetworkingFailure => &mut self.networking_failures,
            IssueBucket::RestartLoop => &mut self.restart_loops,
        }
    }

    #[must_use]
    pub fn bucket(&self, bucket: IssueBucket) -> &[ClusterEvent] {
        match bucket {
            IssueBucket::ResourceExhaustion => &self.resource_exhaustion,
            IssueBucket::ProbeFailure => &self.probe_failures,
            IssueBucket::ImagePullFailure => &self.image_pull_failures,
            IssueBucket::NetworkingFailure => &self.networking_failures,
            IssueBucket::RestartLoop => &self.restart_loops,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        IssueBucket::ALL
            .iter()
            .map(|b| self.bucket(*b).len())
            .sum()
    }

    /// Counts plus a derived has-critical-issue flag per bucket.
    #[must_use]
    pub fn summary(&self) -> Value {
        let mut counts = serde_json::Map::new();
        let mut critical = serde_json::Map::new();
        for bucket in IssueBucket::ALL {
            let n = self.bucket(bucket).len();
            counts.insert(bucket.key().to_string(), json!(n));
            critical.insert(
                format!("has_{}", bucket.key()),
                json!(n > 0),
            );
        }
        json!({
            "bucket_counts": counts,
            "critical_flags": critical,
            "total_critical": self.total(),
        })
    }
}

/// Bucket every abnormal event in the list.
///
/// Deterministic and order-independent: each event is classified on its own
/// fields, so repeated runs over the same list always produce the same
/// per-bucket membership.
#[must_use]
pub fn triage_events(events: &[ClusterEvent]) -> EventTriage {
    let mut triage = EventTriage {
        resource_exhaustion: Vec::new(),
        probe_failures: Vec::new(),
        image_pull_failures: Vec::new(),
        networking_failures: Vec::new(),
        restart_loops: Vec::new(),
    };
    for event in events {
        if let Some(bucket) = classify_event(event) {
            triage.bucket_mut(bucket).push(event.clone());
        }
    }
    triage
}

/// Raw event shapes from `kubectl get events -o json`.
#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    last_timestamp: Option<String>,
    #[serde(default)]
    event_time: Option<String>,
    #[serde(default, rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    involved_object: Option<InvolvedObject>,
    #[serde(default)]
    metadata: Option<EventMeta>,
}

#[derive(Debug, Deserialize)]
struct InvolvedObject {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventMeta {
    #[serde(default)]
    namespace: Option<String>,
}

impl RawEvent {
    fn into_cluster_event(self) -> ClusterEvent {
        let object = match &self.involved_object {
            Some(obj) => format!(
                "{}/{}",
                obj.kind.as_deref().unwrap_or_default(),
                obj.name.as_deref().unwrap_or_default()
            ),
            None => String::from("/"),
        };
        ClusterEvent {
            timestamp: self.last_timestamp.or(self.event_time),
            event_type: self.event_type.unwrap_or_default(),
            reason: self.reason.unwrap_or_default(),
            message: self.message.unwrap_or_default(),
            object,
            namespace: self
                .metadata
                .and_then(|m| m.namespace)
                .unwrap_or_default(),
        }
    }
}

/// Cluster events analysis probe.
pub struct ClusterEventsProbe {
    descriptor: Descriptor,
}

#[derive(Debug, Deserialize)]
struct ClusterEventsInputs {
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    reason_filter: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

impl ClusterEventsProbe {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            descriptor: Descriptor::new(
                "kubectl_events",
                "Kubernetes Events Analysis",
                "Analyze Kubernetes events with triage for OOMKilled, probe failures, image pulls, networking issues, and restart loops",
                &[
                    ("namespace", "Kubernetes namespace (optional, defaults to 'default')"),
                    (
                        "event_type",
                        "Filter by event type: 'Warning', 'Normal', or 'all' (optional, defaults to 'all')",
                    ),
                    (
                        "reason_filter",
                        "Filter by reason: 'OOMKilled', 'Unhealthy', 'BackOff', etc. (optional)",
                    ),
                    ("limit", "Maximum number of events to return (optional, defaults to 50)"),
                ],
                Category::Health,
            ),
        })
    }
}

#[async_trait]
impl Probe for ClusterEventsProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: ClusterEventsInputs = parse_inputs(inputs)?;
        let limit = inputs.limit.unwrap_or(50);
        let event_type = inputs.event_type.as_deref().unwrap_or("all");

        let mut args = vec!["get", "events", "--sort-by=.lastTimestamp"];
        if inputs.namespace != "default" {
            args.push("--namespace");
            args.push(&inputs.namespace);
        }
        args.push("-o");
        args.push("json");

        let command_line = render_command("kubectl", &args);
        let output = run_command("kubectl", &args).await?;
        if !output.success {
            return Ok(Outcome::failure(format!(
                "Failed to get events: {}",
                output.stderr.trim()
            )));
        }

        let list: EventList = serde_json::from_str(&output.stdout)
            .map_err(|e| anyhow::anyhow!("unexpected kubectl events payload: {e}"))?;

        // Newest events are last in the sorted listing.
        let events: Vec<ClusterEvent> = list
            .items
            .into_iter()
            .rev()
            .take(limit)
            .rev()
            .map(RawEvent::into_cluster_event)
            .filter(|e| event_type == "all" || e.event_type == event_type)
            .filter(|e| match &inputs.reason_filter {
                Some(filter) => e
                    .reason
                    .to_lowercase()
                    .contains(&filter.to_lowercase()),
                None => true,
            })
            .collect();

        let triage = triage_events(&events);
        let warning_count = events.iter().filter(|e| e.is_abnormal()).count();

        Ok(Outcome::ok_with_metadata(
            json!({
                "summary": {
                    "total_events": events.len(),
                    "warning_events": warning_count,
                    "triage": triage.summary(),
                },
                "events": events,
                "critical_issues": triage,
            }),
            OutcomeMetadata::for_command(command_line),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, reason: &str, message: &str) -> ClusterEvent {
        ClusterEvent {
            timestamp: Some("2026-08-20T10:00:00Z".to_string()),
            event_type: event_type.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            object: "Pod/checkout-5d4f-abc".to_string(),
            namespace: "shop".to_string(),
        }
    }

    #[test]
    fn normal_events_are_never_bucketed() {
        let e = event("Normal", "OOMKilled", "container killed");
        assert_eq!(classify_event(&e), None);
    }

    #[test]
    fn oomkilled_maps_to_resource_exhaustion() {
        let e = event("Warning", "OOMKilled", "Memory cgroup out of memory");
        assert_eq!(classify_event(&e), Some(IssueBucket::ResourceExhaustion));
    }

    #[test]
    fn probe_failures_match_message_or_reason() {
        let by_message = event("Warning", "Failed", "Liveness probe failed: HTTP 503");
        assert_eq!(classify_event(&by_message), Some(IssueBucket::ProbeFailure));

        let by_reason = event("Warning", "Unhealthy", "Readiness check errored");
        assert_eq!(classify_event(&by_reason), Some(IssueBucket::ProbeFailure));
    }

    #[test]
    fn image_pull_and_networking_and_backoff() {
        let pull = event("Warning", "ErrImagePull", "manifest unknown");
        assert_eq!(classify_event(&pull), Some(IssueBucket::ImagePullFailure));

        let net = event("Warning", "FailedCreate", "dial tcp: connection refused");
        assert_eq!(classify_event(&net), Some(IssueBucket::NetworkingFailure));

        let restart = event("Warning", "BackOff", "Back-off restarting failed container");
        assert_eq!(classify_event(&restart), Some(IssueBucket::RestartLoop));
    }

    #[test]
    fn first_matching_bucket_wins() {
        // OOMKilled reason with a timeout mention in the message: resource
        // exhaustion is checked first and must win.
        let e = event("Warning", "OOMKilled", "killed after timeout");
        assert_eq!(classify_event(&e), Some(IssueBucket::ResourceExhaustion));
    }

    #[test]
    fn triage_is_order_independent_and_idempotent() {
        let events = vec![
            event("Warning", "OOMKilled", "oom"),
            event("Warning", "BackOff", "restarting"),
            event("Normal", "Scheduled", "assigned"),
            event("Warning", "Unhealthy", "probe failed"),
        ];
        let mut reversed = events.clone();
        reversed.reverse();

        let forward = triage_events(&events);
        let backward = triage_events(&reversed);
        let again = triage_events(&events);

        for bucket in IssueBucket::ALL {
            assert_eq!(
                forward.bucket(bucket).len(),
                backward.bucket(bucket).len()
            );
            assert_eq!(forward.bucket(bucket).len(), again.bucket(bucket).len());
        }
        assert_eq!(forward.total(), 3);
    }

    #[test]
    fn summary_reports_critical_flags() {
        let events = vec![event("Warning", "OOMKilled", "oom")];
        let summary = triage_events(&events).summary();
        assert_eq!(summary["bucket_counts"]["resource_exhaustion"], 1);
        assert_eq!(summary["critical_flags"]["has_resource_exhaustion"], true);
        assert_eq!(summary["critical_flags"]["has_restart_loops"], false);
    }

    #[test]
    fn raw_event_conversion_handles_missing_fields() {
        let raw: EventList = serde_json::from_str(
            r#"{"items":[{"type":"Warning","reason":"BackOff","message":"restarting","involvedObject":{"kind":"Pod","name":"api-1"},"metadata":{"namespace":"default"}}]}"#,
        )
        .unwrap();
        let events: Vec<ClusterEvent> = raw
            .items
            .into_iter()
            .map(RawEvent::into_cluster_event)
            .collect();
        assert_eq!(events[0].object, "Pod/api-1");
        assert_eq!(classify_event(&events[0]), Some(IssueBucket::RestartLoop));
    }
}
