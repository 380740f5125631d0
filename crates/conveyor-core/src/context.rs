//! Immutable run context passed by reference into every job invocation.
//!
//! Replaces ambient CI-provided globals with an explicit value: the
//! triggering ref, the commit SHA, exported variables, and a credentials
//! holder the orchestrator never inspects or logs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// The git reference that triggered the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum GitRef {
    Branch(String),
    Tag(String),
}

impl GitRef {
    /// The ref name without any branch/tag qualifier.
    pub fn name(&self) -> &str {
        match self {
            GitRef::Branch(name) | GitRef::Tag(name) => name,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, GitRef::Branch(_))
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, GitRef::Tag(_))
    }
}

impl fmt::Display for GitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An opaque secret value. `Debug` and `Display` never reveal the content.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the raw value. Only the job step environment should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Release credentials supplied out-of-band through the environment.
///
/// The orchestration core forwards these into job step environments and
/// nothing else; they are never logged or serialized.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    username: Option<String>,
    password: Option<Secret>,
}

impl Credentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self {
            username,
            password: password.map(Secret::new),
        }
    }

    pub fn is_set(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }

    /// Write the credential variables into a job step environment.
    pub fn export_into(&self, env: &mut HashMap<String, String>) {
        if let Some(user) = &self.username {
            env.insert("CONVEYOR_REGISTRY_USER".to_string(), user.clone());
        }
        if let Some(password) = &self.password {
            env.insert(
                "CONVEYOR_REGISTRY_PASSWORD".to_string(),
                password.expose().to_string(),
            );
        }
    }
}

/// Immutable context for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Unique identifier for this pipeline run.
    pub pipeline_id: Uuid,

    /// The triggering ref (branch or tag).
    pub git_ref: GitRef,

    /// Commit SHA the pipeline runs against.
    pub commit_sha: String,

    /// Extra variables exported into every job environment.
    pub variables: HashMap<String, String>,

    /// Release credentials holder (contents never logged).
    pub credentials: Credentials,
}

impl RunContext {
    pub fn new(git_ref: GitRef, commit_sha: impl Into<String>) -> Self {
        Self {
            pipeline_id: Uuid::new_v4(),
            git_ref,
            commit_sha: commit_sha.into(),
            variables: HashMap::new(),
            credentials: Credentials::default(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// The environment exported into every job step.
    pub fn exported_env(&self) -> HashMap<String, String> {
        let mut env = self.variables.clone();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("CI_PIPELINE_ID".to_string(), self.pipeline_id.to_string());
        env.insert("CI_COMMIT_SHA".to_string(), self.commit_sha.clone());
        env.insert(
            "CI_COMMIT_REF_NAME".to_string(),
            self.git_ref.name().to_string(),
        );
        if let GitRef::Tag(tag) = &self.git_ref {
            env.insert("CI_COMMIT_TAG".to_string(), tag.clone());
        }
        self.credentials.export_into(&mut env);
        env
    }
}
