//! Subprocess runner for kubectl and git invocations.
//!
//! Every external command gets an explicit timeout; a hung binary becomes a
//! failed sub-result instead of blocking the investigation loop.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;

/// Default timeout for external commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Captured output of a finished external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    /// Stdout on success, otherwise an error carrying stderr.
    pub fn stdout_or_err(self, what: &str) -> Result<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            anyhow::bail!("{what} failed: {}", self.stderr.trim())
        }
    }
}

/// Run a command with the default timeout.
pub async fn run_command(program: &str, args: &[&str]) -> Result<CommandOutput> {
    run_command_in(program, args, None, DEFAULT_COMMAND_TIMEOUT).await
}

/// Run a command in an optional working directory with an explicit timeout.
///
/// Non-zero exit is reported through `CommandOutput::success`, not as an
/// error; only spawn failures and timeouts are errors.
pub async fn run_command_in(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput> {
    debug!(program, ?args, "Running external command");

    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .with_context(|| format!("{program} timed out after {}s", timeout.as_secs()))?
        .with_context(|| format!("Failed to execute {program}"))?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
    })
}

/// Render a command line for outcome metadata.
#[must_use]
pub fn render_command(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let output = run_command("echo", &["hello"]).await.unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let output = run_command("false", &[]).await.unwrap();
        assert!(!output.success);
    }

    #[tokio::test]
    async fn timeout_becomes_error() {
        let result =
            run_command_in("sleep", &["5"], None, Duration::from_millis(50)).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[test]
    fn renders_command_line() {
        assert_eq!(
            render_command("kubectl", &["get", "pods", "-n", "default"]),
            "kubectl get pods -n default"
        );
    }
}
