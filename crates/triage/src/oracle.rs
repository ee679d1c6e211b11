//! Planning and summarizing oracle.
//!
//! The oracle decides one step at a time: given the problem, the probe
//! catalog, and everything observed so far, it either proposes the next
//! probe invocation, declares the plan complete, or produces something we
//! cannot interpret. Uninterpretable output is surfaced as its own decision
//! so the engine can stop with an honest status instead of pretending the
//! investigation finished.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::ai::provider::strip_json_fences;
use crate::ai::{AIProvider, GenerateOptions, MessageBuilder};
use crate::errors::TriageResult;
use crate::probes::{Descriptor, InputMap, Outcome};
use crate::report::Report;

/// Literal the planner emits when it has nothing left to do.
const PLAN_COMPLETE_MARKER: &str = "PLAN COMPLETE";

/// Payload excerpts shown to the oracle are capped at this many characters.
const HISTORY_PAYLOAD_LIMIT: usize = 2_000;

/// One planned probe invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub inputs: InputMap,
}

/// A finished step with its outcome, as recorded by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: StepDescriptor,
    pub outcome: Outcome,
}

/// What the planner decided.
#[derive(Debug, Clone)]
pub enum PlanDecision {
    /// Execute this step next.
    Step(StepDescriptor),
    /// The investigation has gathered enough evidence.
    Complete,
    /// The response was neither a step nor the completion marker.
    Uninterpretable { raw: String },
}

/// Seam between the engine and whatever does the planning.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Decide the next step given the problem and the history so far.
    async fn plan_next_step(
        &self,
        problem: &str,
        catalog: &[Descriptor],
        history: &[StepRecord],
    ) -> TriageResult<PlanDecision>;

    /// Produce the final report from the full investigation history and the
    /// executed plan.
    async fn summarize(
        &self,
        problem: &str,
        history: &[StepRecord],
        plan: &[StepDescriptor],
    ) -> TriageResult<Report>;
}

/// Interpret a raw planner response.
///
/// The completion marker wins over JSON: a response that contains
/// "PLAN COMPLETE" anywhere is a completion signal even if it also carries
/// prose. Anything else must parse as a step object.
#[must_use]
pub fn parse_plan_response(text: &str) -> PlanDecision {
    if text.to_uppercase().contains(PLAN_COMPLETE_MARKER) {
        return PlanDecision::Complete;
    }
    match serde_json::from_str::<StepDescriptor>(strip_json_fences(text)) {
        Ok(step) if !step.tool.is_empty() => PlanDecision::Step(step),
        _ => PlanDecision::Uninterpretable {
            raw: text.to_string(),
        },
    }
}

/// LLM-backed oracle.
pub struct LlmOracle {
    provider: Arc<dyn AIProvider>,
    model: String,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn AIProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    fn planner_system_prompt(catalog: &[Descriptor]) -> String {
        let mut prompt = String::from(
            "You are an expert SRE investigating a production incident. \
             You plan ONE diagnostic step at a time, observing each result \
             before deciding the next step.\n\nAvailable tools:\n",
        );
        for descriptor in catalog {
            prompt.push_str(&format!(
                "\n- {} ({}): {}\n",
                descriptor.id, descriptor.name, descriptor.description
            ));
            for (input, constraint) in &descriptor.inputs {
                prompt.push_str(&format!("    {input}: {constraint}\n"));
            }
        }
        prompt.push_str(&format!(
            "\nRespond with EXACTLY ONE of:\n\
             1. A single JSON object for the next step, with no other text:\n\
             {{\"id\": \"step3\", \"tool\": \"<tool id>\", \"inputs\": {{...}}}}\n\
             2. The literal text {PLAN_COMPLETE_MARKER} when you have enough \
             evidence to explain the incident.\n\n\
             Prefer broad checks first (events, health) and narrow down. \
             A failed step is information; work around it rather than repeating it."
        ));
        prompt
    }

    fn render_history(history: &[StepRecord]) -> String {
        if history.is_empty() {
            return String::from("No steps executed yet.");
        }
        let mut rendered = String::new();
        for record in history {
            let status = if record.outcome.success { "ok" } else { "FAILED" };
            rendered.push_str(&format!(
                "\n### {} -> {} [{}]\ninputs: {}\n",
                record.step.id,
                record.step.tool,
                status,
                Value::Object(record.step.inputs.clone())
            ));
            if let Some(error) = &record.outcome.error {
                rendered.push_str(&format!("error: {error}\n"));
            } else {
                let payload = record.outcome.payload.to_string();
                if payload.len() > HISTORY_PAYLOAD_LIMIT {
                    // Serialized JSON may hold multi-byte text; cut on a
                    // char boundary, never mid-character.
                    let mut end = HISTORY_PAYLOAD_LIMIT;
                    while !payload.is_char_boundary(end) {
                        end -= 1;
                    }
                    rendered.push_str(&payload[..end]);
                    rendered.push_str("... [truncated]\n");
                } else {
                    rendered.push_str(&payload);
                    rendered.push('\n');
                }
            }
        }
        rendered
    }

    fn summarizer_system_prompt() -> &'static str {
        r#"You are an expert SRE writing the final report of an automated incident investigation.
Respond with ONLY a JSON object matching this schema, no other text:
{
  "investigation_metadata": {
    "incident_id": "string",
    "timestamp": "ISO-8601 datetime",
    "initial_query": "string",
    "affected_services": ["string"]
  },
  "overall_assessment": {
    "summary": "string",
    "severity": "critical|high|medium|low",
    "status": "resolved|ongoing|escalated",
    "root_cause_identified": true
  },
  "investigation_path": [
    {"step_number": 1, "action": "string", "rationale": "string", "tool_used": "string", "key_findings": "string"}
  ],
  "key_findings": [
    {"id": 1, "title": "string", "evidence": ["string"], "impact": "string", "affected_services": ["string"]}
  ],
  "root_cause_analysis": {
    "identified_root_cause": "string",
    "confidence": "high|medium|low",
    "supporting_evidence": ["string"],
    "timeline": "string"
  },
  "recommended_actions": [
    {"id": 1, "action": "string", "priority": "immediate|high|medium|low", "expected_impact": "string", "owner": "string"}
  ],
  "metrics_summary": {
    "error_rate_change": "string",
    "latency_impact": "string",
    "affected_endpoints": ["string"],
    "time_to_detection": "string",
    "time_to_resolution": "string"
  }
}"#
    }

    fn render_plan(plan: &[StepDescriptor]) -> String {
        if plan.is_empty() {
            return String::from("No steps were executed.");
        }
        plan.iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {} -> {}", i + 1, step.id, step.tool))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn plan_next_step(
        &self,
        problem: &str,
        catalog: &[Descriptor],
        history: &[StepRecord],
    ) -> TriageResult<PlanDecision> {
        let messages = MessageBuilder::new()
            .system(Self::planner_system_prompt(catalog))
            .user(format!(
                "Problem under investigation:\n{problem}\n\nSteps so far:\n{}",
                Self::render_history(history)
            ))
            .build();

        let response = self
            .provider
            .generate_text(&self.model, &messages, &GenerateOptions::default())
            .await?;

        debug!(
            tokens = response.usage.total_tokens,
            "Planner response received"
        );
        let decision = parse_plan_response(&response.text);
        if let PlanDecision::Uninterpretable { raw } = &decision {
            warn!(
                response = raw.chars().take(200).collect::<String>(),
                "Planner response was uninterpretable"
            );
        }
        Ok(decision)
    }

    async fn summarize(
        &self,
        problem: &str,
        history: &[StepRecord],
        plan: &[StepDescriptor],
    ) -> TriageResult<Report> {
        let messages = MessageBuilder::new()
            .system(Self::summarizer_system_prompt())
            .user(format!(
                "Problem investigated:\n{problem}\n\nExecuted plan:\n{}\n\nFull investigation history:\n{}",
                Self::render_plan(plan),
                Self::render_history(history)
            ))
            .build();

        let response = self
            .provider
            .generate_text(&self.model, &messages, &GenerateOptions::default())
            .await?;

        match serde_json::from_str::<Report>(strip_json_fences(&response.text)) {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(error = %e, "Summarizer output was not valid report JSON, wrapping raw text");
                Ok(Report::from_raw_summary(response.text.trim()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_complete_marker_is_detected() {
        assert!(matches!(
            parse_plan_response("PLAN COMPLETE"),
            PlanDecision::Complete
        ));
        assert!(matches!(
            parse_plan_response("I believe we are done. PLAN COMPLETE"),
            PlanDecision::Complete
        ));
        assert!(matches!(
            parse_plan_response("plan complete"),
            PlanDecision::Complete
        ));
    }

    #[test]
    fn valid_step_json_parses() {
        let decision = parse_plan_response(
            r#"{"id": "step1", "tool": "kubectl_events", "inputs": {"namespace": "shop"}}"#,
        );
        match decision {
            PlanDecision::Step(step) => {
                assert_eq!(step.id, "step1");
                assert_eq!(step.tool, "kubectl_events");
                assert_eq!(step.inputs["namespace"], json!("shop"));
            }
            _ => panic!("expected a step"),
        }
    }

    #[test]
    fn fenced_step_json_parses() {
        let decision = parse_plan_response(
            "```json\n{\"id\": \"step2\", \"tool\": \"k8s_logs\", \"inputs\": {\"pod_name\": \"api-1\"}}\n```",
        );
        assert!(matches!(decision, PlanDecision::Step(_)));
    }

    #[test]
    fn prose_is_uninterpretable_not_complete() {
        let decision = parse_plan_response("Next I would check the logs of the failing pod.");
        match decision {
            PlanDecision::Uninterpretable { raw } => {
                assert!(raw.contains("check the logs"));
            }
            _ => panic!("expected uninterpretable"),
        }
    }

    #[test]
    fn step_without_tool_is_uninterpretable() {
        let decision = parse_plan_response(r#"{"id": "step1", "tool": "", "inputs": {}}"#);
        assert!(matches!(decision, PlanDecision::Uninterpretable { .. }));
    }

    #[test]
    fn missing_inputs_default_to_empty_map() {
        let decision = parse_plan_response(r#"{"id": "step1", "tool": "prometheus_alerts"}"#);
        match decision {
            PlanDecision::Step(step) => assert!(step.inputs.is_empty()),
            _ => panic!("expected a step"),
        }
    }

    #[test]
    fn history_truncation_lands_on_char_boundaries() {
        // Multi-byte text straddling the cut index must not panic the
        // renderer; it backs up to the previous character boundary.
        let record = StepRecord {
            step: StepDescriptor {
                id: "step1".to_string(),
                tool: "k8s_logs".to_string(),
                inputs: InputMap::new(),
            },
            outcome: Outcome::ok(json!({"log": "é".repeat(3000)})),
        };
        let rendered = LlmOracle::render_history(&[record]);
        assert!(rendered.contains("[truncated]"));
    }

    #[test]
    fn plan_rendering_numbers_steps() {
        let plan = vec![
            StepDescriptor {
                id: "step1".to_string(),
                tool: "kubectl_events".to_string(),
                inputs: InputMap::new(),
            },
            StepDescriptor {
                id: "step2".to_string(),
                tool: "k8s_logs".to_string(),
                inputs: InputMap::new(),
            },
        ];
        let rendered = LlmOracle::render_plan(&plan);
        assert!(rendered.contains("1. step1 -> kubectl_events"));
        assert!(rendered.contains("2. step2 -> k8s_logs"));
        assert_eq!(LlmOracle::render_plan(&[]), "No steps were executed.");
    }

    #[test]
    fn history_rendering_truncates_large_payloads() {
        let record = StepRecord {
            step: StepDescriptor {
                id: "step1".to_string(),
                tool: "k8s_logs".to_string(),
                inputs: InputMap::new(),
            },
            outcome: Outcome::ok(json!({"blob": "x".repeat(5000)})),
        };
        let rendered = LlmOracle::render_history(&[record]);
        assert!(rendered.contains("[truncated]"));
        assert!(rendered.len() < 3000);
    }
}
