//! Conveyor Core - CI pipeline domain model
//!
//! Leaf components of the pipeline orchestration core:
//! - Typed pipeline definition loaded once at pipeline start
//! - Immutable run context (ref, commit SHA, credentials)
//! - Step abstraction over shell invocations
//! - Artifact store shared across stage boundaries
//! - Coverage record merging
//! - Ref rules and the release gate

pub mod artifacts;
pub mod context;
pub mod coverage;
pub mod definition;
pub mod error;
pub mod gate;
pub mod job;
pub mod step;
pub mod telemetry;

// Re-export key types
pub use artifacts::{Artifact, ArtifactStore};
pub use context::{Credentials, GitRef, RunContext};
pub use coverage::{combine, combine_lenient, CombinedCoverageReport, CoverageRecord, FileCoverage};
pub use definition::{JobDefinition, PipelineDefinition, StageOptions};
pub use error::{CoverageError, DefinitionError, JobError};
pub use gate::{RefPattern, RefRules, ReleaseGate};
pub use job::{Job, JobStatus, ReportBindings};
pub use step::{ShellStep, Step, StepEnv, StepOutput};
pub use telemetry::init_tracing;
