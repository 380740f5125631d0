//! Process-scoped artifact store.
//!
//! Jobs publish produced files keyed by (job name, path); downstream stages
//! fetch them by path pattern. Publishing is idempotent per key: a
//! republish overwrites. Keys are job-scoped so concurrent publishes from
//! different jobs never conflict. Cross-stage visibility ordering is the
//! stage graph's responsibility, not the store's.

use chrono::{DateTime, Utc};
use glob_match::glob_match;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One published artifact. Shared read-only once in the store.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Producing job.
    pub job: String,

    /// Workspace-relative path.
    pub path: String,

    /// Raw content.
    pub data: Vec<u8>,

    pub published_at: DateTime<Utc>,
}

/// In-memory artifact registry for one pipeline run.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    inner: Mutex<HashMap<(String, String), Arc<Artifact>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an artifact. Overwrites any prior blob under the same
    /// (job, path) key.
    pub fn publish(&self, job: &str, path: &str, data: Vec<u8>) {
        let artifact = Arc::new(Artifact {
            job: job.to_string(),
            path: path.to_string(),
            data,
            published_at: Utc::now(),
        });
        let mut inner = self.inner.lock().unwrap();
        inner.insert((job.to_string(), path.to_string()), artifact);
    }

    /// Fetch all artifacts whose path matches the glob pattern, from any
    /// job, ordered by (job, path) for determinism.
    pub fn fetch(&self, pattern: &str) -> Vec<Arc<Artifact>> {
        let inner = self.inner.lock().unwrap();
        let mut matches: Vec<Arc<Artifact>> = inner
            .values()
            .filter(|artifact| glob_match(pattern, &artifact.path))
            .cloned()
            .collect();
        matches.sort_by(|a, b| (&a.job, &a.path).cmp(&(&b.job, &b.path)));
        matches
    }

    /// Fetch one exact (job, path) entry.
    pub fn get(&self, job: &str, path: &str) -> Option<Arc<Artifact>> {
        let inner = self.inner.lock().unwrap();
        inner.get(&(job.to_string(), path.to_string())).cloned()
    }

    /// Every stored artifact, ordered by (job, path).
    pub fn all(&self) -> Vec<Arc<Artifact>> {
        let inner = self.inner.lock().unwrap();
        let mut artifacts: Vec<Arc<Artifact>> = inner.values().cloned().collect();
        artifacts.sort_by(|a, b| (&a.job, &a.path).cmp(&(&b.job, &b.path)));
        artifacts
    }

    /// All artifacts produced by one job.
    pub fn fetch_job(&self, job: &str) -> Vec<Arc<Artifact>> {
        let inner = self.inner.lock().unwrap();
        let mut matches: Vec<Arc<Artifact>> = inner
            .values()
            .filter(|artifact| artifact.job == job)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.path.cmp(&b.path));
        matches
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
