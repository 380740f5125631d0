//! Conveyor Engine - pipeline execution
//!
//! Orchestrates one pipeline run for one commit:
//! - Runs jobs as isolated units (steps, logs, artifact collection)
//! - Advances the stage graph: sequential stages, concurrent jobs
//! - Aggregates coverage once the stages settle
//! - Renders the pipeline-level report

pub mod executor;
pub mod graph;
pub mod report;

// Re-export key types
pub use executor::{cancel_pair, CancelHandle, CancelSignal, ExecutorConfig, JobExecutor, JobResult, StepLog};
pub use graph::{Pipeline, PipelineResult, PipelineStatus, Stage, StageGraph, StageOutcome, StagePhase, StageStatus};
pub use report::{render_summary, to_json};
