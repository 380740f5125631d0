//! Domain-level error taxonomy for Conveyor.
//!
//! Job-level errors stay contained to their job and stage; pipeline-level
//! failure is an aggregated status value, never an `Err`. A trigger mismatch
//! is not an error at all; the job is recorded as Skipped.

/// Errors produced while loading or validating a pipeline definition.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("failed to read pipeline definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pipeline document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("pipeline declares no stages")]
    NoStages,

    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("jobs declared under undeclared stage '{stage}'")]
    UnknownStage { stage: String },

    #[error("job '{0}' has no script steps")]
    EmptyScript(String),

    #[error("invalid ref pattern '{pattern}': {reason}")]
    InvalidRefPattern { pattern: String, reason: String },
}

/// Errors raised while executing a single job.
///
/// Infrastructure faults (the job could not start) are distinct from script
/// failures (the job ran and a step exited nonzero).
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("step '{step}' exited with code {code}")]
    ScriptFailure { step: String, code: i32 },

    #[error("declared artifact pattern '{pattern}' matched nothing")]
    ArtifactMissing { pattern: String },

    #[error("job '{job}' requires artifact '{pattern}' which no prior job produced")]
    DependencyUnsatisfied { job: String, pattern: String },

    #[error("job cancelled before completion")]
    Cancelled,
}

impl JobError {
    /// Whether this error means the job never ran (as opposed to ran and failed).
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, JobError::Infrastructure(_))
    }
}

/// Errors raised while merging coverage records.
///
/// A malformed record is logged and excluded from the merge; it never aborts
/// the aggregation.
#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error("coverage record from job '{job}' is malformed: {reason}")]
    MergeConflict { job: String, reason: String },
}
