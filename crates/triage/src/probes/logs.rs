//! Pod log retrieval with light severity tallying.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::exec::{render_command, run_command};
use super::{parse_inputs, Category, Descriptor, InputMap, Outcome, OutcomeMetadata, Probe};

fn default_namespace() -> String {
    "default".to_string()
}

const ERROR_MARKERS: &[&str] = &["error", "exception", "fatal", "panic"];
const WARNING_MARKERS: &[&str] = &["warn"];

/// Count log lines that look like errors or warnings.
///
/// Purely lexical; a line counts as at most one of the two, errors first.
#[must_use]
pub fn tally_severities(lines: &[&str]) -> (usize, usize) {
    let mut errors = 0;
    let mut warnings = 0;
    for line in lines {
        let lower = line.to_lowercase();
        if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
            errors += 1;
        } else if WARNING_MARKERS.iter().any(|m| lower.contains(m)) {
            warnings += 1;
        }
    }
    (errors, warnings)
}

/// Pod log retrieval probe.
pub struct PodLogsProbe {
    descriptor: Descriptor,
}

#[derive(Debug, Deserialize)]
struct PodLogsInputs {
    pod_name: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    lines: Option<u32>,
    #[serde(default)]
    since: Option<String>,
    #[serde(default)]
    previous: Option<bool>,
    #[serde(default)]
    search: Option<String>,
}

impl PodLogsProbe {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            descriptor: Descriptor::new(
                "k8s_logs",
                "Kubernetes Pod Logs",
                "Retrieve logs from a pod with optional container selection, time window, and text search",
                &[
                    ("pod_name", "Name of the pod to read logs from"),
                    ("namespace", "Kubernetes namespace (optional, defaults to 'default')"),
                    ("container", "Container name within the pod (optional)"),
                    ("lines", "Number of log lines to tail (optional, defaults to 100)"),
                    ("since", "Relative time window, e.g. '5m' or '1h' (optional)"),
                    (
                        "previous",
                        "Read logs from the previous container instance (optional, defaults to false)",
                    ),
                    ("search", "Case-insensitive substring to filter lines (optional)"),
                ],
                Category::Logs,
            ),
        })
    }
}

#[async_trait]
impl Probe for PodLogsProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: PodLogsInputs = parse_inputs(inputs)?;
        let lines = inputs.lines.unwrap_or(100);
        let tail = format!("--tail={lines}");

        let mut args = vec!["logs", inputs.pod_name.as_str()];
        if inputs.namespace != "default" {
            args.push("-n");
            args.push(&inputs.namespace);
        }
        args.push(&tail);
        if let Some(container) = &inputs.container {
            args.push("-c");
            args.push(container);
        }
        let since_flag;
        if let Some(since) = &inputs.since {
            since_flag = format!("--since={since}");
            args.push(&since_flag);
        }
        if inputs.previous == Some(true) {
            args.push("--previous");
        }

        let command_line = render_command("kubectl", &args);
        let output = run_command("kubectl", &args).await?;
        if !output.success {
            return Ok(Outcome::failure(format!(
                "Failed to get logs for pod '{}': {}",
                inputs.pod_name,
                output.stderr.trim()
            )));
        }

        let all_lines: Vec<&str> = output.stdout.lines().collect();
        let filtered: Vec<&str> = match &inputs.search {
            Some(needle) => {
                let needle = needle.to_lowercase();
                all_lines
                    .iter()
                    .filter(|l| l.to_lowercase().contains(&needle))
                    .copied()
                    .collect()
            }
            None => all_lines.clone(),
        };

        let (errors, warnings) = tally_severities(&filtered);

        Ok(Outcome::ok_with_metadata(
            json!({
                "pod": inputs.pod_name,
                "namespace": inputs.namespace,
                "total_lines": all_lines.len(),
                "returned_lines": filtered.len(),
                "error_lines": errors,
                "warning_lines": warnings,
                "logs": filtered,
            }),
            OutcomeMetadata::for_command(command_line),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_each_line_once() {
        let lines = vec![
            "2026-08-20 ERROR failed to connect",
            "2026-08-20 WARN retrying",
            "2026-08-20 INFO started",
            "panic: index out of range",
        ];
        let (errors, warnings) = tally_severities(&lines);
        assert_eq!(errors, 2);
        assert_eq!(warnings, 1);
    }

    #[test]
    fn error_takes_priority_over_warning_in_one_line() {
        let lines = vec!["WARN followed by ERROR in same line"];
        let (errors, warnings) = tally_severities(&lines);
        assert_eq!(errors, 1);
        assert_eq!(warnings, 0);
    }
}
