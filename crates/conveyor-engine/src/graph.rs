//! Stage graph and pipeline orchestration.
//!
//! Stages execute strictly in sequence; jobs within a stage run
//! concurrently and `advance` blocks until every one settles; that is the
//! only join point in the model. A failed job marks its stage Failed but later
//! stages still run to maximize diagnostics, unless the failed stage is
//! marked fail-fast. The pipeline is Failed when any non-skipped job
//! failed anywhere.

use crate::executor::{CancelSignal, JobExecutor, JobResult};
use conveyor_core::artifacts::ArtifactStore;
use conveyor_core::coverage::{combine_lenient, CombinedCoverageReport};
use conveyor_core::definition::{PipelineDefinition, StageOptions};
use conveyor_core::{DefinitionError, Job, JobStatus, RunContext};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Per-stage sub-state, advanced strictly left to right.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    NotStarted,
    InProgress,
    Done,
}

/// Aggregate outcome of one stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    /// Every job was skipped (or the stage itself was); neutral to the
    /// pipeline outcome.
    Skipped,
}

/// One stage: a set of jobs dispatched together.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub jobs: Vec<Job>,
    pub options: StageOptions,
}

/// Settled results of one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: String,
    pub status: StageStatus,
    pub jobs: Vec<JobResult>,
}

impl StageOutcome {
    fn aggregate(stage: &str, jobs: Vec<JobResult>) -> Self {
        let any_failed = jobs.iter().any(|j| j.status.counts_against_stage());
        let all_skipped = !jobs.is_empty() && jobs.iter().all(JobResult::skipped);
        let status = if any_failed {
            StageStatus::Failed
        } else if all_skipped {
            StageStatus::Skipped
        } else {
            StageStatus::Succeeded
        };
        Self {
            stage: stage.to_string(),
            status,
            jobs,
        }
    }
}

/// One slot of a dispatched stage, kept in definition order.
enum Dispatch {
    /// Settled without execution (trigger mismatch).
    Settled(JobResult),
    /// In flight; the job name is kept for the join-failure path.
    Running(String, tokio::task::JoinHandle<JobResult>),
}

/// Ordered stage collection with a cursor; built once from the definition.
pub struct StageGraph {
    stages: Vec<Stage>,
    cursor: usize,
    phase: StagePhase,
}

impl StageGraph {
    /// Resolve the definition into typed stages and jobs.
    pub fn from_definition(def: &PipelineDefinition) -> Result<Self, DefinitionError> {
        let mut stages = Vec::with_capacity(def.stages.len());
        for name in &def.stages {
            let mut jobs = Vec::new();
            if let Some(defs) = def.jobs.get(name) {
                for (job_name, job_def) in defs {
                    jobs.push(Job::from_definition(name, job_name, job_def)?);
                }
            }
            stages.push(Stage {
                name: name.clone(),
                jobs,
                options: def.options_for(name),
            });
        }
        Ok(Self {
            stages,
            cursor: 0,
            phase: StagePhase::NotStarted,
        })
    }

    pub fn phase(&self) -> StagePhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.stages.len()
    }

    /// The stage `advance` would run next.
    pub fn current(&self) -> Option<&Stage> {
        self.stages.get(self.cursor)
    }

    /// Dispatch all jobs of the current stage concurrently and block until
    /// every one reaches a terminal state. Returns `None` once all stages
    /// are done.
    ///
    /// `clean_so_far` gates stages marked `when_clean`: such a stage is
    /// skipped wholesale when an earlier stage failed.
    pub async fn advance(
        &mut self,
        executor: Arc<JobExecutor>,
        ctx: Arc<RunContext>,
        workspace: &Path,
        cancel: &CancelSignal,
        clean_so_far: bool,
    ) -> Option<StageOutcome> {
        let stage = self.stages.get(self.cursor)?.clone();
        self.phase = StagePhase::InProgress;

        if stage.options.when_clean && !clean_so_far {
            info!(stage = %stage.name, "skipping stage: earlier stage failed");
            return Some(self.settle(self.skip_stage(&stage)));
        }

        info!(stage = %stage.name, jobs = stage.jobs.len(), "stage starting");

        let mut dispatched = Vec::with_capacity(stage.jobs.len());
        for job in stage.jobs.iter().cloned() {
            // Trigger predicate: rejected jobs are Skipped without execution.
            if !job.rules.admits(&ctx.git_ref) {
                info!(job = %job.name, git_ref = %ctx.git_ref, "job skipped by ref rules");
                dispatched.push(Dispatch::Settled(JobResult::skip(&job)));
                continue;
            }

            let executor = Arc::clone(&executor);
            let ctx = Arc::clone(&ctx);
            let cancel = cancel.clone();
            let workdir = workspace.join(&stage.name).join(&job.name);
            let job_name = job.name.clone();

            let handle = tokio::spawn(async move {
                if let Err(e) = std::fs::create_dir_all(&workdir) {
                    return JobResult::infrastructure_failure(
                        &job.name,
                        &job.stage,
                        format!("failed to create job workspace: {}", e),
                    );
                }
                executor.run(&job, &ctx, &workdir, &cancel).await
            });
            dispatched.push(Dispatch::Running(job_name, handle));
        }

        // Joined in definition order so reports stay stable regardless of
        // which jobs were skipped or finished first.
        let mut results = Vec::with_capacity(dispatched.len());
        for dispatch in dispatched {
            match dispatch {
                Dispatch::Settled(result) => results.push(result),
                Dispatch::Running(job_name, handle) => match handle.await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        warn!(stage = %stage.name, job = %job_name, error = %e, "job task panicked");
                        results.push(JobResult::infrastructure_failure(
                            &job_name,
                            &stage.name,
                            format!("job task failed: {}", e),
                        ));
                    }
                },
            }
        }

        let outcome = StageOutcome::aggregate(&stage.name, results);
        info!(stage = %stage.name, status = ?outcome.status, "stage settled");
        Some(self.settle(outcome))
    }

    /// Mark the next stage skipped without dispatching anything (used after
    /// a fail-fast stage failed). Returns `None` once all stages are done.
    pub fn skip_next(&mut self) -> Option<StageOutcome> {
        let stage = self.stages.get(self.cursor)?.clone();
        self.phase = StagePhase::InProgress;
        Some(self.settle(self.skip_stage(&stage)))
    }

    fn skip_stage(&self, stage: &Stage) -> StageOutcome {
        let jobs = stage.jobs.iter().map(JobResult::skip).collect();
        StageOutcome {
            stage: stage.name.clone(),
            status: StageStatus::Skipped,
            jobs,
        }
    }

    fn settle(&mut self, outcome: StageOutcome) -> StageOutcome {
        self.cursor += 1;
        self.phase = if self.is_done() {
            StagePhase::Done
        } else {
            StagePhase::NotStarted
        };
        outcome
    }
}

/// Pipeline state machine: Pending → Running → {Succeeded, Failed}.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub pipeline_id: String,

    /// Digest of the definition this run executed.
    pub definition_digest: String,

    pub status: PipelineStatus,
    pub stages: Vec<StageOutcome>,
    pub duration_ms: u64,

    /// Merged coverage across all stored coverage artifacts.
    pub coverage: CombinedCoverageReport,

    /// Pipeline-level warnings (excluded coverage records).
    pub warnings: Vec<String>,
}

impl PipelineResult {
    pub fn succeeded(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    pub fn job_count(&self, status: JobStatus) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.jobs.iter())
            .filter(|j| j.status == status)
            .count()
    }
}

/// Pipeline orchestrator: advances the stage graph to completion.
pub struct Pipeline;

impl Pipeline {
    /// Execute the whole pipeline for one ref/commit.
    pub async fn run(
        def: &PipelineDefinition,
        ctx: RunContext,
        workspace: &Path,
        config: crate::executor::ExecutorConfig,
    ) -> anyhow::Result<PipelineResult> {
        let (_handle, cancel) = crate::executor::cancel_pair();
        Self::run_with_cancel(def, ctx, workspace, config, cancel).await
    }

    /// Execute the pipeline under an external cancellation signal.
    pub async fn run_with_cancel(
        def: &PipelineDefinition,
        ctx: RunContext,
        workspace: &Path,
        config: crate::executor::ExecutorConfig,
        cancel: CancelSignal,
    ) -> anyhow::Result<PipelineResult> {
        let start = Instant::now();
        def.validate()?;
        let definition_digest = def.digest();

        let mut graph = StageGraph::from_definition(def)?;
        let store = Arc::new(ArtifactStore::new());
        let executor = Arc::new(JobExecutor::new(Arc::clone(&store), config));
        let ctx = Arc::new(ctx);
        let pipeline_id = ctx.pipeline_id.to_string();

        info!(
            pipeline_id = %pipeline_id,
            git_ref = %ctx.git_ref,
            commit = %ctx.commit_sha,
            digest = %&definition_digest[..12],
            "pipeline starting"
        );

        let mut stages: Vec<StageOutcome> = Vec::new();
        let mut clean = true;

        while let Some(outcome) = graph
            .advance(
                Arc::clone(&executor),
                Arc::clone(&ctx),
                workspace,
                &cancel,
                clean,
            )
            .await
        {
            let failed = outcome.status == StageStatus::Failed;
            let fail_fast = def.options_for(&outcome.stage).fail_fast;
            stages.push(outcome);

            if failed {
                clean = false;
                if fail_fast {
                    // Remaining stages never dispatch; recorded as skipped.
                    while let Some(skipped) = graph.skip_next() {
                        stages.push(skipped);
                    }
                    break;
                }
            }
        }

        let coverage = aggregate_coverage(def, &store);
        let warnings = coverage.warnings.clone();

        let status = if clean {
            PipelineStatus::Succeeded
        } else {
            PipelineStatus::Failed
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            pipeline_id = %pipeline_id,
            status = ?status,
            duration_ms,
            "pipeline finished"
        );

        Ok(PipelineResult {
            pipeline_id,
            definition_digest,
            status,
            stages,
            duration_ms,
            coverage,
            warnings,
        })
    }
}

/// Merge every stored coverage artifact bound by a job's
/// `reports.coverage_report` declaration.
fn aggregate_coverage(def: &PipelineDefinition, store: &ArtifactStore) -> CombinedCoverageReport {
    let mut inputs: Vec<(String, Arc<conveyor_core::Artifact>)> = Vec::new();

    for jobs in def.jobs.values() {
        for (job_name, job_def) in jobs {
            let Some(binding) = job_def
                .artifacts
                .as_ref()
                .and_then(|a| a.reports.coverage_report.as_deref())
            else {
                continue;
            };
            match store.get(job_name, binding) {
                Some(artifact) => inputs.push((job_name.clone(), artifact)),
                // Glob bindings were published under their concrete paths;
                // fall back to a pattern fetch scoped to this job.
                None => {
                    for artifact in store.fetch(binding) {
                        if artifact.job == *job_name {
                            inputs.push((job_name.clone(), artifact));
                        }
                    }
                }
            }
        }
    }

    combine_lenient(
        inputs
            .iter()
            .map(|(job, artifact)| (job.as_str(), artifact.data.as_slice())),
    )
}
