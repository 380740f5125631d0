//! Pipeline-level reporting.
//!
//! One human-readable summary (job table + coverage table) and one
//! machine-readable JSON document per run.

use crate::graph::{PipelineResult, StageStatus};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use conveyor_core::JobStatus;

/// Render the per-job summary table plus coverage totals.
pub fn render_summary(result: &PipelineResult) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Stage", "Job", "Status", "Duration", "Exit"]);

    for stage in &result.stages {
        for job in &stage.jobs {
            table.add_row(vec![
                stage.stage.clone(),
                job.job_name.clone(),
                job.status.to_string(),
                format_duration(job.duration_ms),
                if job.skipped() {
                    "-".to_string()
                } else {
                    job.exit_code.to_string()
                },
            ]);
        }
    }

    let mut out = String::new();
    out.push_str(&table.to_string());
    out.push('\n');

    if !result.coverage.is_empty() {
        out.push_str("\nCoverage:\n");
        out.push_str(&result.coverage.render_table());
        out.push('\n');
    }

    for warning in all_warnings(result) {
        out.push_str(&format!("warning: {}\n", warning));
    }

    out.push_str(&format!(
        "\nPipeline {}: {} succeeded, {} failed, {} skipped ({})\n",
        result.pipeline_id,
        result.job_count(JobStatus::Succeeded),
        result.job_count(JobStatus::Failed),
        result.job_count(JobStatus::Skipped),
        if result.succeeded() { "SUCCEEDED" } else { "FAILED" },
    ));
    out
}

/// Machine-readable form of the whole run.
pub fn to_json(result: &PipelineResult) -> serde_json::Value {
    serde_json::json!({
        "pipeline_id": result.pipeline_id,
        "definition_digest": result.definition_digest,
        "status": result.status,
        "duration_ms": result.duration_ms,
        "stages": result.stages,
        "coverage": result.coverage.to_json(),
        "warnings": all_warnings(result),
    })
}

fn all_warnings(result: &PipelineResult) -> Vec<String> {
    let mut warnings = result.warnings.clone();
    for stage in &result.stages {
        for job in &stage.jobs {
            for warning in &job.warnings {
                warnings.push(format!("{}: {}", job.job_name, warning));
            }
        }
    }
    warnings
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Whether any stage failed (for callers that only track stage outcomes).
pub fn any_stage_failed(result: &PipelineResult) -> bool {
    result
        .stages
        .iter()
        .any(|stage| stage.status == StageStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::JobResult;
    use crate::graph::{PipelineStatus, StageOutcome};
    use conveyor_core::coverage::CombinedCoverageReport;

    fn job_row(name: &str, status: JobStatus, exit_code: i32) -> JobResult {
        JobResult {
            job_name: name.to_string(),
            stage: "qa".to_string(),
            status,
            exit_code,
            steps: Vec::new(),
            duration_ms: 1234,
            error: None,
            infrastructure: false,
            warnings: Vec::new(),
        }
    }

    fn sample_result() -> PipelineResult {
        PipelineResult {
            pipeline_id: "run-1".to_string(),
            definition_digest: "abc123".to_string(),
            status: PipelineStatus::Failed,
            stages: vec![StageOutcome {
                stage: "qa".to_string(),
                status: StageStatus::Failed,
                jobs: vec![
                    job_row("unit", JobStatus::Succeeded, 0),
                    job_row("integration", JobStatus::Failed, 1),
                    job_row("nightly", JobStatus::Skipped, 0),
                ],
            }],
            duration_ms: 5000,
            coverage: CombinedCoverageReport::default(),
            warnings: vec!["coverage record excluded".to_string()],
        }
    }

    #[test]
    fn test_render_summary_lists_jobs_and_outcome() {
        let rendered = render_summary(&sample_result());
        assert!(rendered.contains("unit"));
        assert!(rendered.contains("integration"));
        assert!(rendered.contains("skipped"));
        assert!(rendered.contains("FAILED"));
        assert!(rendered.contains("warning: coverage record excluded"));
    }

    #[test]
    fn test_to_json_shape() {
        let json = to_json(&sample_result());
        assert_eq!(json["pipeline_id"], "run-1");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stages"][0]["jobs"][1]["exit_code"], 1);
        assert_eq!(json["warnings"][0], "coverage record excluded");
    }

    #[test]
    fn test_any_stage_failed() {
        assert!(any_stage_failed(&sample_result()));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(200), "200ms");
        assert_eq!(format_duration(1500), "1.5s");
    }
}
