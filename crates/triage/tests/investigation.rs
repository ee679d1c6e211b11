//! End-to-end engine behavior with a scripted oracle and stub probes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use triage::errors::{TriageError, TriageResult};
use triage::oracle::{Oracle, PlanDecision, StepDescriptor, StepRecord};
use triage::probes::{Catalog, Category, Descriptor, InputMap, Outcome, Probe};
use triage::report::{KeyFinding, Report};
use triage::{Engine, StopReason};

struct StubProbe {
    descriptor: Descriptor,
    fail: bool,
    calls: AtomicUsize,
}

impl StubProbe {
    fn new(id: &str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            descriptor: Descriptor::new(
                id,
                id,
                "stub probe",
                &[("target", "What to inspect (optional)")],
                Category::Health,
            ),
            fail,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Probe for StubProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, _inputs: &InputMap) -> anyhow::Result<Outcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Ok(Outcome::failure("stub failure"))
        } else {
            Ok(Outcome::ok(json!({"observed": true})))
        }
    }
}

struct ScriptedOracle {
    script: Mutex<Vec<PlanDecision>>,
    summarize_calls: AtomicUsize,
    summarized_plan_len: AtomicUsize,
}

impl ScriptedOracle {
    fn new(mut decisions: Vec<PlanDecision>) -> Arc<Self> {
        decisions.reverse();
        Arc::new(Self {
            script: Mutex::new(decisions),
            summarize_calls: AtomicUsize::new(0),
            summarized_plan_len: AtomicUsize::new(0),
        })
    }

    fn step(id: &str, tool: &str) -> PlanDecision {
        PlanDecision::Step(StepDescriptor {
            id: id.to_string(),
            tool: tool.to_string(),
            inputs: InputMap::new(),
        })
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn plan_next_step(
        &self,
        _problem: &str,
        _catalog: &[Descriptor],
        _history: &[StepRecord],
    ) -> TriageResult<PlanDecision> {
        let mut script = self.script.lock().unwrap();
        // An exhausted script keeps proposing steps, like a runaway planner.
        Ok(script
            .pop()
            .unwrap_or_else(|| Self::step("extra", "check")))
    }

    async fn summarize(
        &self,
        _problem: &str,
        history: &[StepRecord],
        plan: &[StepDescriptor],
    ) -> TriageResult<Report> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        self.summarized_plan_len.store(plan.len(), Ordering::SeqCst);
        let mut report = Report::default();
        report.key_findings = history
            .iter()
            .map(|r| KeyFinding {
                title: format!("{} via {}", r.step.id, r.step.tool),
                ..KeyFinding::default()
            })
            .collect();
        Ok(report)
    }
}

fn engine_with(
    probes: Vec<Arc<dyn Probe>>,
    oracle: Arc<ScriptedOracle>,
    max_steps: usize,
    output_dir: &std::path::Path,
) -> Engine {
    let mut catalog = Catalog::new();
    for probe in probes {
        catalog.register(probe);
    }
    Engine::new(catalog, oracle, max_steps, output_dir.to_path_buf())
}

#[tokio::test]
async fn completes_when_planner_declares_done() {
    let dir = tempfile::tempdir().unwrap();
    let probe = StubProbe::new("check", false);
    let oracle = ScriptedOracle::new(vec![
        ScriptedOracle::step("step1", "check"),
        ScriptedOracle::step("step2", "check"),
        PlanDecision::Complete,
    ]);
    let engine = engine_with(vec![probe.clone() as Arc<dyn Probe>], oracle.clone(), 10, dir.path());

    let result = engine.run("checkout is slow").await.unwrap();

    assert_eq!(result.stop_reason, StopReason::Complete);
    assert_eq!(result.history.len(), 2);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    assert_eq!(oracle.summarize_calls.load(Ordering::SeqCst), 1);
    // The summarizer sees the executed plan alongside the history.
    assert_eq!(oracle.summarized_plan_len.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn budget_caps_a_runaway_planner() {
    let dir = tempfile::tempdir().unwrap();
    let probe = StubProbe::new("check", false);
    // Empty script: the oracle proposes steps forever.
    let oracle = ScriptedOracle::new(vec![]);
    let engine = engine_with(vec![probe.clone() as Arc<dyn Probe>], oracle.clone(), 3, dir.path());

    let result = engine.run("checkout is slow").await.unwrap();

    assert_eq!(result.stop_reason, StopReason::BudgetExhausted);
    assert_eq!(result.history.len(), 3);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    // Exhausting the budget still summarizes, exactly once.
    assert_eq!(oracle.summarize_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_steps_are_recorded_and_do_not_abort() {
    let dir = tempfile::tempdir().unwrap();
    let good = StubProbe::new("good", false);
    let bad = StubProbe::new("bad", true);
    let oracle = ScriptedOracle::new(vec![
        ScriptedOracle::step("step1", "bad"),
        ScriptedOracle::step("step2", "missing_tool"),
        ScriptedOracle::step("step3", "good"),
        PlanDecision::Complete,
    ]);
    let engine = engine_with(vec![good as Arc<dyn Probe>, bad], oracle, 10, dir.path());

    let result = engine.run("checkout is slow").await.unwrap();

    assert_eq!(result.stop_reason, StopReason::Complete);
    assert_eq!(result.history.len(), 3);
    assert!(!result.history[0].outcome.success);
    assert!(result.history[1]
        .outcome
        .error
        .as_deref()
        .unwrap()
        .contains("not found"));
    assert!(result.history[2].outcome.success);
}

#[tokio::test]
async fn uninterpretable_plan_is_a_distinct_stop_reason() {
    let dir = tempfile::tempdir().unwrap();
    let probe = StubProbe::new("check", false);
    let oracle = ScriptedOracle::new(vec![
        ScriptedOracle::step("step1", "check"),
        PlanDecision::Uninterpretable {
            raw: "let me think about this".to_string(),
        },
    ]);
    let engine = engine_with(vec![probe as Arc<dyn Probe>], oracle.clone(), 10, dir.path());

    let result = engine.run("checkout is slow").await.unwrap();

    assert_eq!(result.stop_reason, StopReason::PlanUninterpretable);
    assert_eq!(result.history.len(), 1);
    // Still summarized despite the abnormal stop.
    assert_eq!(oracle.summarize_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_catalog_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = ScriptedOracle::new(vec![PlanDecision::Complete]);
    let engine = Engine::new(Catalog::new(), oracle.clone(), 10, dir.path().to_path_buf());

    let err = engine.run("checkout is slow").await.unwrap_err();

    assert!(matches!(err, TriageError::EmptyCatalog));
    assert_eq!(oracle.summarize_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transcript_and_report_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let probe = StubProbe::new("check", false);
    let oracle = ScriptedOracle::new(vec![
        ScriptedOracle::step("step1", "check"),
        PlanDecision::Complete,
    ]);
    let engine = engine_with(vec![probe as Arc<dyn Probe>], oracle, 10, dir.path());

    let result = engine.run("checkout is slow").await.unwrap();

    let transcript = std::fs::read_to_string(result.output_path.join("transcript.txt")).unwrap();
    assert!(transcript.contains("checkout is slow"));
    assert!(transcript.contains("step1"));

    let report: Report = serde_json::from_str(
        &std::fs::read_to_string(result.output_path.join("report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report.investigation_metadata.incident_id, result.run_id);
    assert_eq!(report.investigation_metadata.initial_query, "checkout is slow");
    assert_eq!(report.investigation_metadata.steps_executed, 1);
    assert_eq!(report.investigation_metadata.tools_used, vec!["check"]);
}

#[tokio::test]
async fn transcript_grows_while_the_investigation_runs() {
    struct TranscriptPeek {
        descriptor: Descriptor,
        output_dir: std::path::PathBuf,
        seen: Mutex<String>,
    }

    #[async_trait]
    impl Probe for TranscriptPeek {
        fn descriptor(&self) -> &Descriptor {
            &self.descriptor
        }

        async fn execute(&self, _inputs: &InputMap) -> anyhow::Result<Outcome> {
            // The run directory name is the run id, unknown up front.
            let mut so_far = String::new();
            for entry in std::fs::read_dir(&self.output_dir)? {
                let transcript = entry?.path().join("transcript.txt");
                if transcript.is_file() {
                    so_far = std::fs::read_to_string(transcript)?;
                }
            }
            *self.seen.lock().unwrap() = so_far;
            Ok(Outcome::ok(json!({"observed": true})))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let peek = Arc::new(TranscriptPeek {
        descriptor: Descriptor::new(
            "peek",
            "peek",
            "reads its own investigation transcript",
            &[],
            Category::Health,
        ),
        output_dir: dir.path().to_path_buf(),
        seen: Mutex::new(String::new()),
    });
    let oracle = ScriptedOracle::new(vec![
        ScriptedOracle::step("step1", "peek"),
        PlanDecision::Complete,
    ]);
    let engine = engine_with(vec![peek.clone() as Arc<dyn Probe>], oracle, 10, dir.path());

    engine.run("checkout is slow").await.unwrap();

    // The header must already be on disk by the time the first step runs.
    let seen = peek.seen.lock().unwrap();
    assert!(seen.contains("checkout is slow"), "transcript on disk during run: {seen:?}");
}

#[tokio::test]
async fn engine_fills_report_metadata_authoritatively() {
    let dir = tempfile::tempdir().unwrap();
    let probe = StubProbe::new("check", false);
    let other = StubProbe::new("other", false);
    let oracle = ScriptedOracle::new(vec![
        ScriptedOracle::step("step1", "check"),
        ScriptedOracle::step("step2", "other"),
        ScriptedOracle::step("step3", "check"),
        PlanDecision::Complete,
    ]);
    let engine = engine_with(vec![probe as Arc<dyn Probe>, other], oracle, 10, dir.path());

    let result = engine.run("checkout is slow").await.unwrap();

    assert_eq!(result.report.investigation_metadata.steps_executed, 3);
    assert_eq!(
        result.report.investigation_metadata.tools_used,
        vec!["check", "other"]
    );
    assert!(!result.report.investigation_metadata.incident_id.is_empty());
    assert_eq!(result.report.key_findings.len(), 3);
}
