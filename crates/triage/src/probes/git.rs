//! Git probes: recent commit history and deployment risk analysis.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::exec::{run_command_in, DEFAULT_COMMAND_TIMEOUT};
use super::{parse_inputs, Category, Descriptor, InputMap, Outcome, OutcomeMetadata, Probe};

/// Field and record separators for machine-readable `git log` output.
const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';
const LOG_FORMAT: &str = "%H%x1f%an%x1f%ae%x1f%aI%x1f%s%x1e";

/// Commit subjects containing any of these are treated as deploy-related.
const DEPLOYMENT_PATTERNS: &[&str] = &["deploy", "release", "merge"];

/// One parsed commit.
#[derive(Debug, Clone, Serialize)]
pub struct Commit {
    pub hash: String,
    pub author: String,
    pub email: String,
    pub date: String,
    pub subject: String,
}

/// Parse separator-delimited `git log` output.
#[must_use]
pub fn parse_log_output(output: &str) -> Vec<Commit> {
    output
        .split(RECORD_SEP)
        .filter_map(|record| {
            let record = record.trim_matches(['\n', ' ']);
            if record.is_empty() {
                return None;
            }
            let fields: Vec<&str> = record.split(FIELD_SEP).collect();
            if fields.len() != 5 {
                return None;
            }
            Some(Commit {
                hash: fields[0].to_string(),
                author: fields[1].to_string(),
                email: fields[2].to_string(),
                date: fields[3].to_string(),
                subject: fields[4].to_string(),
            })
        })
        .collect()
}

/// Whether a commit subject looks deploy-related (case-insensitive).
#[must_use]
pub fn is_deployment_commit(subject: &str) -> bool {
    let lower = subject.to_lowercase();
    DEPLOYMENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Label the share of deploy-related commits in the window.
#[must_use]
pub fn frequency_label(ratio: f64) -> &'static str {
    if ratio > 0.5 {
        "high_frequency"
    } else if ratio > 0.2 {
        "moderate"
    } else {
        "normal"
    }
}

/// Deployment risk from the absolute count of deploy-related commits:
/// more than five is high, more than three is medium, otherwise low.
#[must_use]
pub fn risk_level(deployment_commits: usize) -> &'static str {
    if deployment_commits > 5 {
        "high"
    } else if deployment_commits > 3 {
        "medium"
    } else {
        "low"
    }
}

fn recommendations_for(risk: &str) -> Vec<&'static str> {
    match risk {
        "high" => vec![
            "Correlate each recent deployment with the incident start time",
            "Consider rolling back the most recent deployment",
            "Review deployment pipeline for batched or rushed changes",
        ],
        "medium" => vec![
            "Check whether the latest deployment window overlaps the incident",
            "Review recent merges for configuration or dependency changes",
        ],
        _ => vec!["Deployment activity is low; look beyond code changes"],
    }
}

fn validate_repo(path: &Path) -> Result<()> {
    if !path.is_dir() {
        anyhow::bail!("Git repository path does not exist: {}", path.display());
    }
    if !path.join(".git").exists() {
        anyhow::bail!("Not a git repository: {}", path.display());
    }
    Ok(())
}

async fn git_log(
    repo: &Path,
    since: &str,
    limit: usize,
    author: Option<&str>,
    path_filter: Option<&str>,
) -> Result<(Vec<Commit>, String)> {
    let format_arg = format!("--pretty=format:{LOG_FORMAT}");
    let since_arg = format!("--since={since}");
    let limit_arg = format!("-n{limit}");
    let mut args = vec!["log", format_arg.as_str(), since_arg.as_str(), limit_arg.as_str()];
    let author_arg;
    if let Some(author) = author {
        author_arg = format!("--author={author}");
        args.push(&author_arg);
    }
    if let Some(path) = path_filter {
        args.push("--");
        args.push(path);
    }

    let command_line = format!("git {}", args.join(" "));
    let output = run_command_in("git", &args, Some(repo), DEFAULT_COMMAND_TIMEOUT)
        .await?
        .stdout_or_err("git log")?;
    Ok((parse_log_output(&output), command_line))
}

/// Recent commit history probe.
#[derive(Debug)]
pub struct CommitHistoryProbe {
    descriptor: Descriptor,
    repo_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CommitHistoryInputs {
    #[serde(default)]
    time_range: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    author_filter: Option<String>,
    #[serde(default)]
    path_filter: Option<String>,
}

impl CommitHistoryProbe {
    pub fn new(repo_path: PathBuf) -> Result<Self> {
        validate_repo(&repo_path)?;
        Ok(Self {
            descriptor: Descriptor::new(
                "git_commit_history",
                "Git Commit History",
                "List recent commits in the service repository to correlate code changes with the incident",
                &[
                    (
                        "time_range",
                        "How far back to look, e.g. '24 hours ago', '7 days ago' (optional, defaults to '7 days ago')",
                    ),
                    ("limit", "Maximum number of commits (optional, defaults to 20)"),
                    ("author_filter", "Filter commits by author name or email (optional)"),
                    ("path_filter", "Restrict to commits touching a path (optional)"),
                ],
                Category::Code,
            ),
            repo_path,
        })
    }
}

#[async_trait]
impl Probe for CommitHistoryProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: CommitHistoryInputs = parse_inputs(inputs)?;
        let since = inputs.time_range.as_deref().unwrap_or("7 days ago");
        let limit = inputs.limit.unwrap_or(20);

        let (commits, command_line) = git_log(
            &self.repo_path,
            since,
            limit,
            inputs.author_filter.as_deref(),
            inputs.path_filter.as_deref(),
        )
        .await?;

        let authors: std::collections::BTreeSet<&str> =
            commits.iter().map(|c| c.author.as_str()).collect();

        Ok(Outcome::ok_with_metadata(
            json!({
                "repository": self.repo_path.display().to_string(),
                "since": since,
                "total_commits": commits.len(),
                "unique_authors": authors.len(),
                "commits": commits,
            }),
            OutcomeMetadata::for_command(command_line),
        ))
    }
}

/// Deployment pattern and risk analysis probe.
#[derive(Debug)]
pub struct DeploymentAnalysisProbe {
    descriptor: Descriptor,
    repo_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct DeploymentAnalysisInputs {
    #[serde(default)]
    time_range: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

impl DeploymentAnalysisProbe {
    pub fn new(repo_path: PathBuf) -> Result<Self> {
        validate_repo(&repo_path)?;
        Ok(Self {
            descriptor: Descriptor::new(
                "git_deployment_analysis",
                "Git Deployment Analysis",
                "Analyze deployment-related commit patterns and estimate deployment risk for the incident window",
                &[
                    (
                        "time_range",
                        "How far back to look, e.g. '24 hours ago', '7 days ago' (optional, defaults to '7 days ago')",
                    ),
                    ("limit", "Maximum number of commits to analyze (optional, defaults to 50)"),
                ],
                Category::Code,
            ),
            repo_path,
        })
    }
}

#[async_trait]
impl Probe for DeploymentAnalysisProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: DeploymentAnalysisInputs = parse_inputs(inputs)?;
        let since = inputs.time_range.as_deref().unwrap_or("7 days ago");
        let limit = inputs.limit.unwrap_or(50);

        let (commits, command_line) =
            git_log(&self.repo_path, since, limit, None, None).await?;

        let deployment_commits: Vec<&Commit> = commits
            .iter()
            .filter(|c| is_deployment_commit(&c.subject))
            .collect();

        let ratio = if commits.is_empty() {
            0.0
        } else {
            deployment_commits.len() as f64 / commits.len() as f64
        };
        let frequency = frequency_label(ratio);
        let risk = risk_level(deployment_commits.len());

        Ok(Outcome::ok_with_metadata(
            json!({
                "repository": self.repo_path.display().to_string(),
                "since": since,
                "total_commits": commits.len(),
                "deployment_commits": deployment_commits.len(),
                "deployment_ratio": ratio,
                "deployment_frequency": frequency,
                "risk_level": risk,
                "recommendations": recommendations_for(risk),
                "recent_deployments": deployment_commits.iter().take(10).collect::<Vec<_>>(),
            }),
            OutcomeMetadata::for_command(command_line),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_separator_delimited_log() {
        let output = "abc123\x1fAlice\x1falice@example.com\x1f2026-08-20T10:00:00+00:00\x1fdeploy: ship v2\x1e\ndef456\x1fBob\x1fbob@example.com\x1f2026-08-19T09:00:00+00:00\x1ffix: null check\x1e";
        let commits = parse_log_output(output);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].hash, "abc123");
        assert_eq!(commits[0].subject, "deploy: ship v2");
        assert_eq!(commits[1].author, "Bob");
    }

    #[test]
    fn malformed_records_are_skipped() {
        let output = "only-two-fields\x1fAlice\x1e";
        assert!(parse_log_output(output).is_empty());
        assert!(parse_log_output("").is_empty());
    }

    #[test]
    fn deployment_commit_detection() {
        assert!(is_deployment_commit("Deploy checkout v3.1"));
        assert!(is_deployment_commit("chore: release 2.0.0"));
        assert!(is_deployment_commit("Merge pull request #42"));
        assert!(!is_deployment_commit("fix: off-by-one in pager"));
    }

    #[test]
    fn frequency_labels() {
        assert_eq!(frequency_label(0.6), "high_frequency");
        assert_eq!(frequency_label(0.3), "moderate");
        assert_eq!(frequency_label(0.2), "normal");
        assert_eq!(frequency_label(0.0), "normal");
    }

    #[test]
    fn risk_uses_absolute_deployment_commit_count() {
        assert_eq!(risk_level(6), "high");
        assert_eq!(risk_level(5), "medium");
        assert_eq!(risk_level(4), "medium");
        assert_eq!(risk_level(3), "low");
        assert_eq!(risk_level(0), "low");
    }

    #[test]
    fn repo_validation_rejects_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        let err = CommitHistoryProbe::new(dir.path().to_path_buf()).unwrap_err();
        assert!(err.to_string().contains("Not a git repository"));

        let missing = dir.path().join("nope");
        let err = DeploymentAnalysisProbe::new(missing).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
