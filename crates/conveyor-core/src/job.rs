//! Jobs: the smallest schedulable unit of a pipeline.
//!
//! Jobs are constructed once from the pipeline definition at pipeline start
//! and carry compiled trigger rules, declared artifact patterns, and report
//! bindings. Lifecycle: Pending → Running → {Succeeded, Failed, Skipped}.

use crate::definition::JobDefinition;
use crate::error::DefinitionError;
use crate::gate::RefRules;
use crate::step::ShellStep;
use serde::{Deserialize, Serialize};

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped
        )
    }

    /// Skipped jobs contribute neither success nor failure to their stage.
    pub fn counts_against_stage(&self) -> bool {
        matches!(self, JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Report bindings: where the job writes its structured outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportBindings {
    pub junit: Option<String>,
    pub coverage: Option<String>,
}

impl ReportBindings {
    /// All bound report paths, for artifact collection.
    pub fn paths(&self) -> Vec<&str> {
        self.junit
            .iter()
            .chain(self.coverage.iter())
            .map(String::as_str)
            .collect()
    }
}

/// A fully resolved job, ready for dispatch.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,

    /// Stage this job belongs to.
    pub stage: String,

    /// Container image identifier (opaque; forwarded to the step runner).
    pub image: Option<String>,

    pub before_script: Vec<String>,
    pub script: Vec<String>,
    pub after_script: Vec<String>,

    /// Declared artifact path patterns, relative to the job workspace.
    pub artifact_patterns: Vec<String>,

    /// Artifact patterns that must already be in the store before dispatch.
    pub needs: Vec<String>,

    pub reports: ReportBindings,

    /// Compiled trigger predicate; jobs whose rules reject the current ref
    /// are Skipped without execution.
    pub rules: RefRules,
}

impl Job {
    /// Resolve a definition entry into a dispatchable job.
    pub fn from_definition(
        stage: &str,
        name: &str,
        def: &JobDefinition,
    ) -> Result<Self, DefinitionError> {
        let rules = RefRules::parse(&def.only, &def.except)?;
        let (artifact_patterns, reports) = match &def.artifacts {
            Some(artifacts) => (
                artifacts.paths.clone(),
                ReportBindings {
                    junit: artifacts.reports.junit.clone(),
                    coverage: artifacts.reports.coverage_report.clone(),
                },
            ),
            None => (Vec::new(), ReportBindings::default()),
        };

        Ok(Self {
            name: name.to_string(),
            stage: stage.to_string(),
            image: def.image.clone(),
            before_script: def.before_script.clone(),
            script: def.script.clone(),
            after_script: def.after_script.clone(),
            artifact_patterns,
            needs: def.needs.clone(),
            reports,
            rules,
        })
    }

    /// Main steps: before_script then script, in order.
    pub fn main_steps(&self) -> Vec<ShellStep> {
        self.before_script
            .iter()
            .chain(self.script.iter())
            .map(ShellStep::new)
            .collect()
    }

    /// Cleanup steps; the executor runs these even after a failure.
    pub fn cleanup_steps(&self) -> Vec<ShellStep> {
        self.after_script.iter().map(ShellStep::new).collect()
    }
}
