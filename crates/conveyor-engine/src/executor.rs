//! Job execution.
//!
//! Runs one job as an isolated unit inside its own workspace directory:
//! before/main steps in order, cleanup steps always (also after failure and
//! under the cancellation grace period), artifact collection even when the
//! job failed; partial coverage data must survive a failing test run.

use conveyor_core::{Job, JobError, JobStatus, RunContext, Step, StepEnv};
use conveyor_core::artifacts::ArtifactStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Executor tuning knobs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Per-step timeout.
    pub step_timeout: Duration,

    /// Bound on cleanup steps after a cancellation.
    pub grace_period: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(3600),
            grace_period: Duration::from_secs(10),
        }
    }
}

/// Sender half of the pipeline cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation of all in-flight jobs.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver half; cloned into every dispatched job.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected cancel handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Log of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLog {
    /// Step description (the shell line).
    pub step: String,

    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,

    /// True for after_script entries.
    pub cleanup: bool,
}

/// Result of one job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_name: String,
    pub stage: String,
    pub status: JobStatus,

    /// Exit code of the failing step, 0 on success, -1 on infrastructure
    /// faults.
    pub exit_code: i32,

    pub steps: Vec<StepLog>,
    pub duration_ms: u64,

    /// Failure description, when the job failed.
    pub error: Option<String>,

    /// True when the job never ran (spawn/image fault), as opposed to ran
    /// and failed.
    pub infrastructure: bool,

    /// Non-fatal findings: missing declared artifacts, failed cleanup steps.
    pub warnings: Vec<String>,
}

impl JobResult {
    pub fn passed(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    pub fn skipped(&self) -> bool {
        self.status == JobStatus::Skipped
    }

    /// Result for a job whose trigger rules rejected the current ref.
    pub fn skip(job: &Job) -> Self {
        Self {
            job_name: job.name.clone(),
            stage: job.stage.clone(),
            status: JobStatus::Skipped,
            exit_code: 0,
            steps: Vec::new(),
            duration_ms: 0,
            error: None,
            infrastructure: false,
            warnings: Vec::new(),
        }
    }

    /// Result for a job whose strict artifact dependencies were unmet.
    pub fn dependency_failure(job: &Job, reason: String) -> Self {
        Self {
            job_name: job.name.clone(),
            stage: job.stage.clone(),
            status: JobStatus::Failed,
            exit_code: -1,
            steps: Vec::new(),
            duration_ms: 0,
            error: Some(reason),
            infrastructure: false,
            warnings: Vec::new(),
        }
    }

    /// Result for a job that could not be dispatched at all.
    pub fn infrastructure_failure(job_name: &str, stage: &str, reason: String) -> Self {
        Self {
            job_name: job_name.to_string(),
            stage: stage.to_string(),
            status: JobStatus::Failed,
            exit_code: -1,
            steps: Vec::new(),
            duration_ms: 0,
            error: Some(reason),
            infrastructure: true,
            warnings: Vec::new(),
        }
    }
}

enum StepRun {
    Completed(conveyor_core::StepOutput),
    Failed(JobError),
    Cancelled,
}

/// Executes jobs and publishes their declared outputs to the artifact store.
pub struct JobExecutor {
    store: Arc<ArtifactStore>,
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(store: Arc<ArtifactStore>, config: ExecutorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Run one job to a terminal state. Never returns `Err`: every fault is
    /// folded into the [`JobResult`] so sibling jobs keep running.
    pub async fn run(
        &self,
        job: &Job,
        ctx: &RunContext,
        workdir: &Path,
        cancel: &CancelSignal,
    ) -> JobResult {
        let start = Instant::now();
        info!(job = %job.name, stage = %job.stage, image = job.image.as_deref(), "job starting");

        let env = StepEnv {
            workdir: workdir.to_path_buf(),
            env: ctx.exported_env(),
        };

        let mut steps = Vec::new();
        let mut warnings = Vec::new();

        // Strict dependencies are checked before anything runs. An unmet
        // pattern fails the job (not the infrastructure).
        for pattern in &job.needs {
            if self.store.fetch(pattern).is_empty() {
                let err = JobError::DependencyUnsatisfied {
                    job: job.name.clone(),
                    pattern: pattern.clone(),
                };
                warn!(job = %job.name, pattern = %pattern, "required artifact missing");
                return JobResult::dependency_failure(job, err.to_string());
            }
        }

        // Artifacts published by earlier stages are materialized into the
        // job workspace before any step runs.
        if let Err(e) = self.stage_inputs(workdir) {
            warn!(job = %job.name, error = %e, "failed to materialize artifacts");
            return JobResult::infrastructure_failure(&job.name, &job.stage, e.to_string());
        }

        let mut failure: Option<JobError> = None;
        let mut exit_code = 0;
        let mut cancelled = cancel.is_cancelled();

        for step in job.main_steps() {
            if cancelled {
                break;
            }
            match self.run_step(&step, &env, cancel).await {
                StepRun::Completed(output) => {
                    let ok = output.success();
                    steps.push(StepLog {
                        step: step.describe(),
                        exit_code: output.exit_code,
                        stdout: output.stdout,
                        stderr: output.stderr,
                        cleanup: false,
                    });
                    if !ok {
                        exit_code = steps.last().map(|s| s.exit_code).unwrap_or(-1);
                        failure = Some(JobError::ScriptFailure {
                            step: step.describe(),
                            code: exit_code,
                        });
                        break;
                    }
                }
                StepRun::Failed(e) => {
                    exit_code = -1;
                    failure = Some(e);
                    break;
                }
                StepRun::Cancelled => {
                    cancelled = true;
                }
            }
        }

        // Cleanup always runs, bounded by the grace period once cancelled.
        let cleanup_timeout = if cancelled {
            self.config.grace_period
        } else {
            self.config.step_timeout
        };
        for step in job.cleanup_steps() {
            match tokio::time::timeout(cleanup_timeout, step.execute(&env)).await {
                Ok(Ok(output)) => {
                    if !output.success() {
                        warnings.push(format!(
                            "cleanup step '{}' exited with code {}",
                            step.describe(),
                            output.exit_code
                        ));
                    }
                    steps.push(StepLog {
                        step: step.describe(),
                        exit_code: output.exit_code,
                        stdout: output.stdout,
                        stderr: output.stderr,
                        cleanup: true,
                    });
                }
                Ok(Err(e)) => warnings.push(format!("cleanup step failed to start: {}", e)),
                Err(_) => warnings.push(format!(
                    "cleanup step '{}' exceeded the grace period",
                    step.describe()
                )),
            }
        }

        // Declared outputs are published even when the job failed.
        self.collect_artifacts(job, workdir, &mut warnings);

        if cancelled && failure.is_none() {
            failure = Some(JobError::Cancelled);
            exit_code = -1;
        }
        let infrastructure = failure
            .as_ref()
            .map(JobError::is_infrastructure)
            .unwrap_or(false);

        let status = if failure.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Succeeded
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match &failure {
            None => info!(job = %job.name, duration_ms, "job succeeded"),
            Some(e) => warn!(job = %job.name, duration_ms, error = %e, "job failed"),
        }

        JobResult {
            job_name: job.name.clone(),
            stage: job.stage.clone(),
            status,
            exit_code,
            steps,
            duration_ms,
            error: failure.map(|e| e.to_string()),
            infrastructure,
            warnings,
        }
    }

    async fn run_step(&self, step: &dyn Step, env: &StepEnv, cancel: &CancelSignal) -> StepRun {
        debug!(step = %step.describe(), "running step");
        tokio::select! {
            result = tokio::time::timeout(self.config.step_timeout, step.execute(env)) => {
                match result {
                    Ok(Ok(output)) => StepRun::Completed(output),
                    Ok(Err(e)) => StepRun::Failed(e),
                    Err(_) => StepRun::Failed(JobError::Infrastructure(format!(
                        "step '{}' timed out after {:?}",
                        step.describe(),
                        self.config.step_timeout
                    ))),
                }
            }
            _ = cancel.cancelled() => StepRun::Cancelled,
        }
    }

    /// Write every stored artifact into the job workspace. Runs before any
    /// step: stage sequencing guarantees only prior stages have published.
    fn stage_inputs(&self, workdir: &Path) -> Result<(), JobError> {
        for artifact in self.store.all() {
            let dest = workdir.join(&artifact.path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    JobError::Infrastructure(format!(
                        "failed to create directory for '{}': {}",
                        artifact.path, e
                    ))
                })?;
            }
            std::fs::write(&dest, &artifact.data).map_err(|e| {
                JobError::Infrastructure(format!(
                    "failed to write artifact '{}': {}",
                    artifact.path, e
                ))
            })?;
        }
        Ok(())
    }

    /// Publish files matching the declared artifact patterns and report
    /// bindings. A pattern that matches nothing becomes a warning, not a
    /// failure.
    fn collect_artifacts(&self, job: &Job, workdir: &Path, warnings: &mut Vec<String>) {
        let mut patterns: Vec<&str> = job.artifact_patterns.iter().map(String::as_str).collect();
        patterns.extend(job.reports.paths());

        for pattern in patterns {
            let full = workdir.join(pattern);
            let mut published = 0usize;

            let walker = match glob::glob(&full.to_string_lossy()) {
                Ok(walker) => walker,
                Err(e) => {
                    warnings.push(format!("invalid artifact pattern '{}': {}", pattern, e));
                    continue;
                }
            };

            for entry in walker.flatten() {
                if !entry.is_file() {
                    continue;
                }
                let rel = entry
                    .strip_prefix(workdir)
                    .unwrap_or(&entry)
                    .to_string_lossy()
                    .to_string();
                match std::fs::read(&entry) {
                    Ok(data) => {
                        debug!(job = %job.name, path = %rel, bytes = data.len(), "publishing artifact");
                        self.store.publish(&job.name, &rel, data);
                        published += 1;
                    }
                    Err(e) => warnings.push(format!("failed to read artifact '{}': {}", rel, e)),
                }
            }

            if published == 0 {
                let missing = JobError::ArtifactMissing {
                    pattern: pattern.to_string(),
                };
                warn!(job = %job.name, pattern = %pattern, "declared artifact missing");
                warnings.push(missing.to_string());
            }
        }
    }
}
