//! Step abstraction over shell invocations.
//!
//! A job's "logic" is an ordered list of steps. The orchestrator only sees
//! the [`Step`] capability (execute against an environment, observe an exit
//! status), so a native in-process action can substitute for a shell line
//! without changing orchestration logic.

use crate::error::JobError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Environment a step executes in: an isolated working directory plus the
/// exported pipeline variables.
#[derive(Debug, Clone)]
pub struct StepEnv {
    pub workdir: PathBuf,
    pub env: HashMap<String, String>,
}

/// Captured outcome of one step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One executable unit of a job.
#[async_trait]
pub trait Step: Send + Sync {
    /// Short description for logs and reports.
    fn describe(&self) -> String;

    /// Execute the step. An `Err` means the step could not start at all
    /// (infrastructure fault); a nonzero exit code is a normal `Ok`.
    async fn execute(&self, env: &StepEnv) -> Result<StepOutput, JobError>;
}

/// A single shell line run via `sh -c` in the step environment.
#[derive(Debug, Clone)]
pub struct ShellStep {
    line: String,
}

impl ShellStep {
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }
}

#[async_trait]
impl Step for ShellStep {
    fn describe(&self) -> String {
        self.line.clone()
    }

    async fn execute(&self, env: &StepEnv) -> Result<StepOutput, JobError> {
        // kill_on_drop: cancelling the surrounding future must terminate
        // the child, not leak it.
        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.line)
            .current_dir(&env.workdir)
            .envs(&env.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::Infrastructure(format!("failed to spawn shell: {}", e)))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| JobError::Infrastructure(format!("failed to wait for shell: {}", e)))?;

        Ok(StepOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_in(dir: &std::path::Path) -> StepEnv {
        StepEnv {
            workdir: dir.to_path_buf(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_shell_step_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let step = ShellStep::new("echo hello");

        let output = step.execute(&env_in(dir.path())).await.expect("execute failed");
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_shell_step_nonzero_exit_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let step = ShellStep::new("exit 3");

        let output = step.execute(&env_in(dir.path())).await.expect("execute failed");
        assert!(!output.success());
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_shell_step_sees_environment() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        env.env
            .insert("CI_COMMIT_SHA".to_string(), "abc123".to_string());

        let step = ShellStep::new("echo $CI_COMMIT_SHA");
        let output = step.execute(&env).await.expect("execute failed");
        assert!(output.stdout.contains("abc123"));
    }

    #[tokio::test]
    async fn test_shell_step_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let step = ShellStep::new("echo data > produced.txt");
        step.execute(&env_in(dir.path())).await.expect("execute failed");
        assert!(dir.path().join("produced.txt").exists());
    }
}
