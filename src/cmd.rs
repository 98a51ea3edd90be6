//! Process invocation helpers
//!
//! Thin wrappers around [`tokio::process::Command`] shared by the launcher,
//! readiness engine, and teardown. All invocations are synchronous from the
//! caller's point of view: spawn, wait, collect.

use thiserror::Error;
use tokio::process::Command;

/// A command that could not be spawned or exited non-zero
#[derive(Debug, Error)]
#[error("command failed: {command}: {message}")]
pub struct CommandError {
    /// The command line that failed
    pub command: String,
    /// Stderr of the process, or the spawn error
    pub message: String,
}

/// Run a command and return its stdout on clean exit.
///
/// Non-zero exit status becomes a [`CommandError`] carrying stderr, so the
/// caller can wrap it into the taxonomy error for its pipeline stage.
pub async fn run(program: &str, args: &[&str]) -> Result<String, CommandError> {
    let rendered = render(program, args);
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| CommandError {
            command: rendered.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(CommandError {
            command: rendered,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run a command and report only whether it exited cleanly.
///
/// Used by readiness probes where a failure is an expected observation,
/// not an error to propagate.
pub async fn succeeds(program: &str, args: &[&str]) -> bool {
    matches!(
        Command::new(program).args(args).output().await,
        Ok(output) if output.status.success()
    )
}

/// Run a command and capture whatever it produced, never failing.
///
/// Used for diagnostics bundles: stdout and stderr are merged, and a spawn
/// failure is rendered as text instead of an error.
pub async fn capture(program: &str, args: &[&str]) -> String {
    match Command::new(program).args(args).output().await {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                text.push_str(&stderr);
            }
            text
        }
        Err(e) => format!("<failed to run {}: {}>", render(program, args), e),
    }
}

fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout() {
        let out = run("echo", &["hello"]).await.expect("echo should succeed");
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn run_reports_failing_command_line() {
        let err = run("false", &[]).await.expect_err("false exits non-zero");
        assert!(err.to_string().contains("false"));
    }

    #[tokio::test]
    async fn run_surfaces_spawn_failure() {
        let err = run("/nonexistent/k0sbox-test-binary", &[])
            .await
            .expect_err("missing binary cannot spawn");
        assert!(err.command.contains("k0sbox-test-binary"));
    }

    #[tokio::test]
    async fn succeeds_reflects_exit_status() {
        assert!(succeeds("true", &[]).await);
        assert!(!succeeds("false", &[]).await);
        assert!(!succeeds("/nonexistent/k0sbox-test-binary", &[]).await);
    }

    #[tokio::test]
    async fn capture_never_fails() {
        let text = capture("/nonexistent/k0sbox-test-binary", &[]).await;
        assert!(text.contains("failed to run"));
    }
}
