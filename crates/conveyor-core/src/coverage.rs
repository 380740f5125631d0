//! Coverage record merging.
//!
//! Each test job emits one immutable [`CoverageRecord`]: per source file,
//! line and branch hit counts. [`combine`] unions them into one
//! [`CombinedCoverageReport`].
//!
//! Merge semantics:
//! - Records are deduplicated last-write-wins per job name, so a re-run
//!   replaces rather than double counts.
//! - The cross-job union takes the per-line maximum hit count; a line is
//!   covered when any contributing record covered it. Maximum is
//!   commutative, associative, and idempotent, so aggregation order never
//!   changes the result.
//! - An empty record set merges to an empty report, not an error.
//! - Malformed records are excluded with a warning annotation; they never
//!   abort the merge.

use crate::error::CoverageError;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Hit counts for one source file, keyed by line / branch number.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCoverage {
    #[serde(default)]
    pub lines: BTreeMap<u32, u64>,

    #[serde(default)]
    pub branches: BTreeMap<u32, u64>,
}

impl FileCoverage {
    fn union_in_place(&mut self, other: &FileCoverage) {
        for (line, hits) in &other.lines {
            let entry = self.lines.entry(*line).or_insert(0);
            *entry = (*entry).max(*hits);
        }
        for (branch, hits) in &other.branches {
            let entry = self.branches.entry(*branch).or_insert(0);
            *entry = (*entry).max(*hits);
        }
    }

    pub fn covered_lines(&self) -> usize {
        self.lines.values().filter(|hits| **hits > 0).count()
    }

    pub fn covered_branches(&self) -> usize {
        self.branches.values().filter(|hits| **hits > 0).count()
    }
}

/// One job's partial coverage measurement. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoverageRecord {
    /// Producing job name (the last-write-wins deduplication key).
    pub job: String,

    /// Source file path → hit counts.
    #[serde(default)]
    pub files: BTreeMap<String, FileCoverage>,
}

impl CoverageRecord {
    /// Parse a machine-readable coverage document emitted by a job.
    pub fn from_json(job: &str, data: &[u8]) -> Result<Self, CoverageError> {
        serde_json::from_slice(data).map_err(|e| CoverageError::MergeConflict {
            job: job.to_string(),
            reason: e.to_string(),
        })
    }
}

/// The merged, pipeline-level coverage report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CombinedCoverageReport {
    pub files: BTreeMap<String, FileCoverage>,

    /// Merge warnings (excluded records), surfaced on the report instead of
    /// failing the pipeline.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl CombinedCoverageReport {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_lines(&self) -> usize {
        self.files.values().map(|f| f.lines.len()).sum()
    }

    pub fn covered_lines(&self) -> usize {
        self.files.values().map(FileCoverage::covered_lines).sum()
    }

    pub fn total_branches(&self) -> usize {
        self.files.values().map(|f| f.branches.len()).sum()
    }

    pub fn covered_branches(&self) -> usize {
        self.files
            .values()
            .map(FileCoverage::covered_branches)
            .sum()
    }

    /// Covered-line percentage; 0.0 for an empty report.
    pub fn line_rate(&self) -> f64 {
        if self.total_lines() == 0 {
            return 0.0;
        }
        self.covered_lines() as f64 / self.total_lines() as f64 * 100.0
    }

    /// Merge another report into this one (same union semantics).
    pub fn merge(mut self, other: CombinedCoverageReport) -> CombinedCoverageReport {
        for (path, coverage) in &other.files {
            self.files.entry(path.clone()).or_default().union_in_place(coverage);
        }
        self.warnings.extend(other.warnings);
        self
    }

    /// Machine-readable form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "files": self.files,
            "summary": {
                "lines_total": self.total_lines(),
                "lines_covered": self.covered_lines(),
                "line_rate": self.line_rate(),
                "branches_total": self.total_branches(),
                "branches_covered": self.covered_branches(),
            },
            "warnings": self.warnings,
        })
    }

    /// Human-readable table: one row per file plus a totals row.
    pub fn render_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["File", "Lines", "Covered", "Line %", "Branches", "Covered"]);

        for (path, coverage) in &self.files {
            let total = coverage.lines.len();
            let covered = coverage.covered_lines();
            let rate = if total == 0 {
                0.0
            } else {
                covered as f64 / total as f64 * 100.0
            };
            table.add_row(vec![
                path.clone(),
                total.to_string(),
                covered.to_string(),
                format!("{rate:.1}%"),
                coverage.branches.len().to_string(),
                coverage.covered_branches().to_string(),
            ]);
        }

        table.add_row(vec![
            "TOTAL".to_string(),
            self.total_lines().to_string(),
            self.covered_lines().to_string(),
            format!("{:.1}%", self.line_rate()),
            self.total_branches().to_string(),
            self.covered_branches().to_string(),
        ]);

        table.to_string()
    }
}

/// Merge coverage records into one combined report.
pub fn combine(records: &[CoverageRecord]) -> CombinedCoverageReport {
    // Last-write-wins per job key: a re-run replaces the earlier record.
    let mut by_job: IndexMap<&str, &CoverageRecord> = IndexMap::new();
    for record in records {
        by_job.insert(record.job.as_str(), record);
    }

    let mut report = CombinedCoverageReport::default();
    for record in by_job.values() {
        for (path, coverage) in &record.files {
            report
                .files
                .entry(path.clone())
                .or_default()
                .union_in_place(coverage);
        }
    }
    report
}

/// Merge raw coverage documents, excluding malformed ones with a warning.
pub fn combine_lenient<'a>(
    inputs: impl IntoIterator<Item = (&'a str, &'a [u8])>,
) -> CombinedCoverageReport {
    let mut records = Vec::new();
    let mut warnings = Vec::new();

    for (job, data) in inputs {
        match CoverageRecord::from_json(job, data) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(job = %job, error = %e, "excluding malformed coverage record");
                warnings.push(e.to_string());
            }
        }
    }

    let mut report = combine(&records);
    report.warnings = warnings;
    report
}
