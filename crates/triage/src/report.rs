//! Final investigation report schema.
//!
//! The summarizing oracle is asked to emit exactly this shape; unknown or
//! missing sections degrade to defaults rather than failing the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where the incident stands at the end of the investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestigationStatus {
    Resolved,
    Ongoing,
    Escalated,
}

impl Default for InvestigationStatus {
    fn default() -> Self {
        Self::Ongoing
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvestigationMetadata {
    #[serde(default)]
    pub incident_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub initial_query: String,
    #[serde(default)]
    pub affected_services: Vec<String>,
    #[serde(default)]
    pub steps_executed: usize,
    #[serde(default)]
    pub tools_used: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverallAssessment {
    #[serde(default)]
    pub summary: Option<String>,
    /// "critical", "high", "medium", or "low".
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub status: InvestigationStatus,
    #[serde(default)]
    pub root_cause_identified: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvestigationStep {
    #[serde(default)]
    pub step_number: u32,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub tool_used: String,
    #[serde(default)]
    pub key_findings: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyFinding {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub affected_services: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootCauseAnalysis {
    #[serde(default)]
    pub identified_root_cause: Option<String>,
    /// "high", "medium", or "low".
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(default)]
    pub supporting_evidence: Vec<String>,
    #[serde(default)]
    pub timeline: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendedAction {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub action: String,
    /// "immediate", "high", "medium", or "low".
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub expected_impact: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

/// The full report persisted at the end of every investigation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub investigation_metadata: InvestigationMetadata,
    #[serde(default)]
    pub overall_assessment: OverallAssessment,
    #[serde(default)]
    pub investigation_path: Vec<InvestigationStep>,
    #[serde(default)]
    pub key_findings: Vec<KeyFinding>,
    #[serde(default)]
    pub root_cause_analysis: RootCauseAnalysis,
    #[serde(default)]
    pub recommended_actions: Vec<RecommendedAction>,
    #[serde(default)]
    pub metrics_summary: Option<Value>,
}

impl Report {
    /// Wrap an unparsable summarizer response so the raw analysis is still
    /// preserved in the report.
    #[must_use]
    pub fn from_raw_summary(raw: &str) -> Self {
        Self {
            overall_assessment: OverallAssessment {
                summary: Some(raw.to_string()),
                status: InvestigationStatus::Ongoing,
                ..OverallAssessment::default()
            },
            key_findings: vec![KeyFinding {
                id: 1,
                title: "Summarizer returned unstructured output; see assessment summary"
                    .to_string(),
                ..KeyFinding::default()
            }],
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_report() {
        let report: Report = serde_json::from_str(
            r#"{
                "overall_assessment": {"status": "escalated", "severity": "high"},
                "key_findings": [{"id": 1, "title": "checkout pods restarting"}]
            }"#,
        )
        .unwrap();
        assert_eq!(
            report.overall_assessment.status,
            InvestigationStatus::Escalated
        );
        assert_eq!(report.key_findings.len(), 1);
        assert!(report.key_findings[0].evidence.is_empty());
        assert!(report.investigation_path.is_empty());
    }

    #[test]
    fn deserializes_full_summarizer_output() {
        let report: Report = serde_json::from_str(
            r#"{
                "investigation_metadata": {
                    "incident_id": "inc-42",
                    "timestamp": "2026-08-20T10:00:00Z",
                    "initial_query": "checkout latency spiked",
                    "affected_services": ["checkout", "cart"]
                },
                "overall_assessment": {
                    "summary": "Checkout degraded by a bad rollout",
                    "severity": "critical",
                    "status": "ongoing",
                    "root_cause_identified": true
                },
                "investigation_path": [
                    {
                        "step_number": 1,
                        "action": "Checked recent warning events",
                        "rationale": "Broad first look",
                        "tool_used": "kubectl_events",
                        "key_findings": "OOMKilled events on checkout pods"
                    }
                ],
                "key_findings": [
                    {
                        "id": 1,
                        "title": "Checkout pods OOMKilled after deploy",
                        "evidence": ["12 OOMKilled events in 30m"],
                        "impact": "5xx spike on /checkout",
                        "affected_services": ["checkout"]
                    }
                ],
                "root_cause_analysis": {
                    "identified_root_cause": "Memory limit lowered in last deploy",
                    "confidence": "high",
                    "supporting_evidence": ["limit changed 512Mi -> 256Mi"],
                    "timeline": "Deploy at 13:55, OOMKills from 14:02"
                },
                "recommended_actions": [
                    {
                        "id": 1,
                        "action": "Roll back the memory limit change",
                        "priority": "immediate",
                        "expected_impact": "Stops the OOMKill loop",
                        "owner": "checkout on-call"
                    }
                ],
                "metrics_summary": {
                    "error_rate_change": "+400%",
                    "affected_endpoints": ["/checkout"]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(report.overall_assessment.status, InvestigationStatus::Ongoing);
        assert!(report.overall_assessment.root_cause_identified);
        assert_eq!(report.overall_assessment.severity.as_deref(), Some("critical"));
        assert_eq!(report.key_findings[0].evidence.len(), 1);
        assert_eq!(
            report.root_cause_analysis.confidence.as_deref(),
            Some("high")
        );
        assert_eq!(
            report.recommended_actions[0].priority.as_deref(),
            Some("immediate")
        );
        assert_eq!(report.investigation_metadata.affected_services.len(), 2);
    }

    #[test]
    fn raw_summary_fallback_keeps_text() {
        let report = Report::from_raw_summary("The service looks fine overall.");
        assert_eq!(report.overall_assessment.status, InvestigationStatus::Ongoing);
        assert!(!report.overall_assessment.root_cause_identified);
        assert_eq!(
            report.overall_assessment.summary.as_deref(),
            Some("The service looks fine overall.")
        );
    }
}
