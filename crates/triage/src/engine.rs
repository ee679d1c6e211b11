//! The investigation engine: a bounded plan, execute, observe loop.
//!
//! The engine owns the step budget. The oracle is never trusted to stop on
//! its own: the loop re-checks the budget before every planning call, so a
//! runaway planner costs at most `max_steps` probe executions. Whatever ends
//! the loop, the investigation is summarized exactly once. The transcript is
//! appended to disk as each step executes, so a killed process still leaves
//! everything observed up to that point.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{TriageError, TriageResult};
use crate::oracle::{Oracle, PlanDecision, StepDescriptor, StepRecord};
use crate::probes::Catalog;
use crate::report::Report;

/// Why the investigation loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The planner declared the plan complete.
    Complete,
    /// The step budget ran out before the planner finished.
    BudgetExhausted,
    /// The planner produced output that was neither a step nor completion.
    PlanUninterpretable,
}

/// Everything an investigation produced.
#[derive(Debug)]
pub struct InvestigationResult {
    pub run_id: String,
    pub stop_reason: StopReason,
    pub history: Vec<StepRecord>,
    pub report: Report,
    /// Directory the transcript and report were written to.
    pub output_path: PathBuf,
}

/// The investigation engine.
pub struct Engine {
    catalog: Catalog,
    oracle: Arc<dyn Oracle>,
    max_steps: usize,
    output_dir: PathBuf,
}

impl Engine {
    pub fn new(
        catalog: Catalog,
        oracle: Arc<dyn Oracle>,
        max_steps: usize,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            catalog,
            oracle,
            max_steps,
            output_dir,
        }
    }

    /// Run one investigation to completion.
    ///
    /// Probe failures are observations, not errors; only AI transport
    /// failures, persistence failures, and an empty catalog abort the run.
    pub async fn run(&self, problem: &str) -> TriageResult<InvestigationResult> {
        if self.catalog.is_empty() {
            return Err(TriageError::EmptyCatalog);
        }

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let descriptors = self.catalog.list();
        info!(
            run_id,
            probes = descriptors.len(),
            max_steps = self.max_steps,
            "Starting investigation"
        );

        let output_path = self.output_dir.join(&run_id);
        std::fs::create_dir_all(&output_path)?;
        let mut transcript = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_path.join("transcript.txt"))?;
        append(
            &mut transcript,
            &format!("Investigation {run_id}\nStarted: {started_at}\nProblem: {problem}\n"),
        )?;

        let mut history: Vec<StepRecord> = Vec::new();

        let stop_reason = loop {
            if history.len() >= self.max_steps {
                warn!(run_id, steps = history.len(), "Step budget exhausted");
                break StopReason::BudgetExhausted;
            }

            let decision = self
                .oracle
                .plan_next_step(problem, &descriptors, &history)
                .await?;

            match decision {
                PlanDecision::Complete => {
                    info!(run_id, steps = history.len(), "Planner declared completion");
                    break StopReason::Complete;
                }
                PlanDecision::Uninterpretable { raw } => {
                    warn!(run_id, "Stopping: planner output uninterpretable");
                    append(
                        &mut transcript,
                        &format!("\n--- uninterpretable planner output ---\n{raw}\n"),
                    )?;
                    break StopReason::PlanUninterpretable;
                }
                PlanDecision::Step(step) => {
                    info!(run_id, step = %step.id, tool = %step.tool, "Executing step");
                    let outcome = self.catalog.dispatch(&step.tool, &step.inputs).await;
                    if !outcome.success {
                        warn!(
                            run_id,
                            step = %step.id,
                            error = outcome.error.as_deref().unwrap_or("unknown"),
                            "Step failed, continuing"
                        );
                    }

                    let mut entry = format!(
                        "\n=== {} ({}) ===\ninputs: {}\nsuccess: {}\n",
                        step.id,
                        step.tool,
                        serde_json::Value::Object(step.inputs.clone()),
                        outcome.success
                    );
                    match &outcome.error {
                        Some(error) => entry.push_str(&format!("error: {error}\n")),
                        None => entry.push_str(&format!("payload: {}\n", outcome.payload)),
                    }
                    append(&mut transcript, &entry)?;

                    history.push(StepRecord { step, outcome });
                }
            }
        };

        // Summarize exactly once, whatever ended the loop.
        let plan: Vec<StepDescriptor> = history.iter().map(|r| r.step.clone()).collect();
        let mut report = self.oracle.summarize(problem, &history, &plan).await?;
        report.investigation_metadata.incident_id = run_id.clone();
        report.investigation_metadata.timestamp = Some(started_at);
        report.investigation_metadata.initial_query = problem.to_string();
        report.investigation_metadata.steps_executed = history.len();
        report.investigation_metadata.tools_used = {
            let mut tools: Vec<String> =
                history.iter().map(|r| r.step.tool.clone()).collect();
            tools.sort();
            tools.dedup();
            tools
        };

        append(
            &mut transcript,
            &format!(
                "\nStopped: {stop_reason:?}\nSteps executed: {}\nFinished: {}\n",
                history.len(),
                Utc::now()
            ),
        )?;

        std::fs::write(
            output_path.join("report.json"),
            serde_json::to_string_pretty(&report)?,
        )?;
        info!(run_id, path = %output_path.display(), "Investigation finished");

        Ok(InvestigationResult {
            run_id,
            stop_reason,
            history,
            report,
            output_path,
        })
    }
}

fn append(file: &mut File, text: &str) -> TriageResult<()> {
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(())
}
