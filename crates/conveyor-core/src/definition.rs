//! Typed pipeline definition document.
//!
//! The declarative stage/job mapping is parsed once at pipeline start into
//! these structs; the orchestrator never reinterprets the document at run
//! time. Stage order comes from the top-level `stages` list; jobs live in a
//! mapping of stage name → job name → job definition.
//!
//! ```yaml
//! stages: [lint, qa, release]
//!
//! jobs:
//!   qa:
//!     unit:
//!       image: python:3.11
//!       script: ["pytest --cov"]
//!       artifacts:
//!         paths: ["dist/*"]
//!         reports:
//!           junit: report.xml
//!           coverage_report: coverage.json
//!   release:
//!     publish:
//!       script: ["twine upload dist/*"]
//!       only: ["/^(\\d+\\.)?(\\d+\\.)?(\\d+)$/"]
//!       except: ["branches"]
//! ```

use crate::error::DefinitionError;
use crate::gate::RefRules;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

/// Artifact report bindings: paths to structured per-job outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportsDefinition {
    /// Structured test-result document produced by the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub junit: Option<String>,

    /// Partial coverage record produced by the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_report: Option<String>,
}

/// Declared artifact outputs of one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactsDefinition {
    /// Path patterns relative to the job workspace.
    #[serde(default)]
    pub paths: Vec<String>,

    #[serde(default)]
    pub reports: ReportsDefinition,
}

/// One job as written in the definition document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDefinition {
    /// Container image the job runs in (opaque to the orchestrator).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default)]
    pub before_script: Vec<String>,

    #[serde(default)]
    pub script: Vec<String>,

    /// Cleanup steps; always run, also after a failed script step.
    #[serde(default)]
    pub after_script: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactsDefinition>,

    /// Artifact patterns this job strictly requires from earlier stages.
    /// An unmet pattern fails the job before any step runs.
    #[serde(default)]
    pub needs: Vec<String>,

    /// Allow ref rules; empty admits every ref.
    #[serde(default)]
    pub only: Vec<String>,

    /// Deny ref rules; any match skips the job.
    #[serde(default)]
    pub except: Vec<String>,
}

/// Stage-wide execution policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageOptions {
    /// When true, a failure in this stage skips all later stages.
    #[serde(default)]
    pub fail_fast: bool,

    /// When true, the stage only runs if no earlier stage failed
    /// (release hardening; default keeps the observed diagnostics-first
    /// behavior where later stages still run).
    #[serde(default)]
    pub when_clean: bool,
}

/// The whole pipeline definition document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineDefinition {
    /// Ordered stage names; execution follows this order strictly.
    pub stages: Vec<String>,

    /// Per-stage execution policy, keyed by stage name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub stage_options: IndexMap<String, StageOptions>,

    /// stage name → job name → job definition.
    #[serde(default)]
    pub jobs: IndexMap<String, IndexMap<String, JobDefinition>>,
}

impl PipelineDefinition {
    /// Parse a definition from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, DefinitionError> {
        let definition: Self = serde_yaml::from_str(text)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Load and validate a definition file.
    pub fn from_path(path: &Path) -> Result<Self, DefinitionError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Validate structural invariants: declared stages are unique, every
    /// job belongs to a declared stage and has at least one script step,
    /// and every ref rule compiles.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.stages.is_empty() {
            return Err(DefinitionError::NoStages);
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.as_str()) {
                return Err(DefinitionError::DuplicateStage(stage.clone()));
            }
        }

        for (stage, jobs) in &self.jobs {
            if !seen.contains(stage.as_str()) {
                return Err(DefinitionError::UnknownStage {
                    stage: stage.clone(),
                });
            }
            for (name, job) in jobs {
                if job.script.is_empty() {
                    return Err(DefinitionError::EmptyScript(name.clone()));
                }
                // Compile rules up front so admission never fails later.
                RefRules::parse(&job.only, &job.except)?;
            }
        }

        Ok(())
    }

    /// Options for one stage (defaults when the stage declares none).
    pub fn options_for(&self, stage: &str) -> StageOptions {
        self.stage_options.get(stage).copied().unwrap_or_default()
    }

    /// Deterministic SHA-256 digest of the definition, recorded on the run.
    pub fn digest(&self) -> String {
        // IndexMap preserves document order, so the JSON form is canonical
        // for a given document.
        let bytes = serde_json::to_vec(self).expect("definition is always serializable");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }

    /// Total number of declared jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.values().map(|jobs| jobs.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
stages: [lint, qa, release]

stage_options:
  release:
    when_clean: true

jobs:
  lint:
    flake8:
      image: python:3.11
      script: ["flake8 ."]
  qa:
    unit:
      image: python:3.11
      before_script: ["pip install -e ."]
      script: ["pytest --cov"]
      artifacts:
        paths: ["dist/*"]
        reports:
          junit: report.xml
          coverage_report: coverage.json
  release:
    publish:
      script: ["twine upload dist/*"]
      needs: ["dist/*"]
      only: ["/^(\\d+\\.)?(\\d+\\.)?(\\d+)$/"]
      except: ["branches"]
"#;

    #[test]
    fn test_parse_example_document() {
        let def = PipelineDefinition::from_yaml(EXAMPLE).expect("parse failed");
        assert_eq!(def.stages, vec!["lint", "qa", "release"]);
        assert_eq!(def.job_count(), 3);

        let unit = &def.jobs["qa"]["unit"];
        assert_eq!(unit.image.as_deref(), Some("python:3.11"));
        assert_eq!(unit.before_script.len(), 1);
        let artifacts = unit.artifacts.as_ref().unwrap();
        assert_eq!(artifacts.paths, vec!["dist/*"]);
        assert_eq!(
            artifacts.reports.coverage_report.as_deref(),
            Some("coverage.json")
        );
        assert_eq!(def.jobs["release"]["publish"].needs, vec!["dist/*"]);

        assert!(def.options_for("release").when_clean);
        assert!(!def.options_for("qa").when_clean);
    }

    #[test]
    fn test_stage_order_is_preserved() {
        let def = PipelineDefinition::from_yaml(EXAMPLE).unwrap();
        assert_eq!(def.stages[0], "lint");
        assert_eq!(def.stages[2], "release");
    }

    #[test]
    fn test_empty_stages_rejected() {
        let err = PipelineDefinition::from_yaml("stages: []\n").unwrap_err();
        assert!(matches!(err, DefinitionError::NoStages));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = PipelineDefinition::from_yaml("stages: [qa, qa]\n").unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateStage(_)));
    }

    #[test]
    fn test_job_under_undeclared_stage_rejected() {
        let doc = r#"
stages: [qa]
jobs:
  deploy:
    publish:
      script: ["true"]
"#;
        let err = PipelineDefinition::from_yaml(doc).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownStage { .. }));
    }

    #[test]
    fn test_job_without_script_rejected() {
        let doc = r#"
stages: [qa]
jobs:
  qa:
    unit:
      image: python:3.11
"#;
        let err = PipelineDefinition::from_yaml(doc).unwrap_err();
        assert!(matches!(err, DefinitionError::EmptyScript(_)));
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let doc = r#"
stages: [release]
jobs:
  release:
    publish:
      script: ["true"]
      only: ["/[/"]
"#;
        let err = PipelineDefinition::from_yaml(doc).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidRefPattern { .. }));
    }

    #[test]
    fn test_digest_is_deterministic_and_content_sensitive() {
        let a = PipelineDefinition::from_yaml(EXAMPLE).unwrap();
        let b = PipelineDefinition::from_yaml(EXAMPLE).unwrap();
        assert_eq!(a.digest(), b.digest());

        let other = PipelineDefinition::from_yaml("stages: [qa]\n").unwrap();
        assert_ne!(a.digest(), other.digest());
    }
}
