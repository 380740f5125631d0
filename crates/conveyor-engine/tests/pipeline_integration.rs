//! Integration tests for full pipeline runs.

use conveyor_core::{GitRef, PipelineDefinition, RunContext};
use conveyor_engine::{
    cancel_pair, render_summary, to_json, ExecutorConfig, Pipeline, PipelineStatus, StageStatus,
};
use conveyor_core::JobStatus;
use std::time::Duration;

async fn run(doc: &str, git_ref: GitRef) -> conveyor_engine::PipelineResult {
    let def = PipelineDefinition::from_yaml(doc).expect("definition should parse");
    let ctx = RunContext::new(git_ref, "abc123");
    let workspace = tempfile::tempdir().expect("tempdir");
    Pipeline::run(&def, ctx, workspace.path(), ExecutorConfig::default())
        .await
        .expect("pipeline run should not error")
}

fn branch(name: &str) -> GitRef {
    GitRef::Branch(name.to_string())
}

fn tag(name: &str) -> GitRef {
    GitRef::Tag(name.to_string())
}

/// All jobs pass: pipeline Succeeded.
#[tokio::test]
async fn test_successful_pipeline() {
    let result = run(
        r#"
stages: [lint, qa]
jobs:
  lint:
    flake8:
      script: ["echo lint ok"]
  qa:
    unit:
      script: ["echo tests ok"]
"#,
        branch("main"),
    )
    .await;

    assert!(result.succeeded());
    assert_eq!(result.job_count(JobStatus::Succeeded), 2);
    assert_eq!(result.job_count(JobStatus::Failed), 0);
    assert!(!result.pipeline_id.is_empty());
    assert!(!result.definition_digest.is_empty());
}

/// Stage A: lint fails, scan succeeds. Stage B still runs.
/// Pipeline outcome is Failed.
#[tokio::test]
async fn test_later_stage_runs_after_failure() {
    let result = run(
        r#"
stages: [lint, qa]
jobs:
  lint:
    flake8:
      script: ["exit 1"]
    scan:
      script: ["echo scan ok"]
  qa:
    unit:
      script: ["echo tests ok"]
"#,
        branch("main"),
    )
    .await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.stages[0].status, StageStatus::Failed);
    assert_eq!(
        result.stages[1].status,
        StageStatus::Succeeded,
        "qa must still run after a lint failure"
    );
    assert_eq!(result.job_count(JobStatus::Succeeded), 2);
    assert_eq!(result.job_count(JobStatus::Failed), 1);
}

/// A fail-fast stage failure skips all later stages.
#[tokio::test]
async fn test_fail_fast_stage_skips_remaining() {
    let result = run(
        r#"
stages: [build, qa]
stage_options:
  build:
    fail_fast: true
jobs:
  build:
    compile:
      script: ["exit 1"]
  qa:
    unit:
      script: ["echo never"]
"#,
        branch("main"),
    )
    .await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.stages[1].status, StageStatus::Skipped);
    assert_eq!(result.stages[1].jobs[0].status, JobStatus::Skipped);
}

/// Artifacts published in stage[i] are visible to stage[i+1]; since jobs
/// materialize inputs at start, this also proves stage[i+1] never began
/// before stage[i] settled.
#[tokio::test]
async fn test_artifact_visibility_across_stage_boundary() {
    let result = run(
        r#"
stages: [build, qa]
jobs:
  build:
    slow:
      script: ["sleep 0.3", "echo slow > slow.txt"]
      artifacts:
        paths: ["slow.txt"]
    fast:
      script: ["echo fast > fast.txt"]
      artifacts:
        paths: ["fast.txt"]
  qa:
    verify:
      script: ["test -f slow.txt", "test -f fast.txt"]
"#,
        branch("main"),
    )
    .await;

    assert!(
        result.succeeded(),
        "downstream stage must see every artifact of the prior stage: {:?}",
        result.stages
    );
}

/// Jobs whose ref rules reject the current ref are Skipped and neutral.
#[tokio::test]
async fn test_trigger_mismatch_is_skipped_not_failed() {
    let doc = r#"
stages: [qa, release]
jobs:
  qa:
    unit:
      script: ["echo tests ok"]
  release:
    publish:
      script: ["echo released > published.txt"]
      only: ["/^(\\d+\\.)?(\\d+\\.)?(\\d+)$/"]
      except: ["branches"]
"#;

    // Branch run: release is skipped, pipeline still succeeds.
    let result = run(doc, branch("main")).await;
    assert!(result.succeeded());
    assert_eq!(result.job_count(JobStatus::Skipped), 1);
    assert_eq!(result.stages[1].status, StageStatus::Skipped);

    // Version tag run: release is admitted.
    let result = run(doc, tag("1.2.3")).await;
    assert!(result.succeeded());
    assert_eq!(result.job_count(JobStatus::Skipped), 0);
    assert_eq!(result.job_count(JobStatus::Succeeded), 2);

    // Pre-release tag: pattern mismatch, release skipped again.
    let result = run(doc, tag("1.2.3-rc")).await;
    assert_eq!(result.job_count(JobStatus::Skipped), 1);
}

/// A release stage marked when_clean does not run after a qa failure,
/// even when the ref would admit it.
#[tokio::test]
async fn test_when_clean_release_requires_clean_pipeline() {
    let result = run(
        r#"
stages: [qa, release]
stage_options:
  release:
    when_clean: true
jobs:
  qa:
    unit:
      script: ["exit 1"]
  release:
    publish:
      script: ["echo released"]
      except: ["branches"]
"#,
        tag("1.2.3"),
    )
    .await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.stages[1].status, StageStatus::Skipped);
}

/// A cancelled run stops the in-flight step, still runs cleanup, and
/// still produces a complete report.
#[tokio::test]
async fn test_cancelled_run_still_produces_report() {
    let def = PipelineDefinition::from_yaml(
        r#"
stages: [qa]
jobs:
  qa:
    unit:
      script: ["sleep 30"]
      after_script: ["echo done > cleanup.txt"]
"#,
    )
    .unwrap();
    let ctx = RunContext::new(branch("main"), "abc123");
    let workspace = tempfile::tempdir().unwrap();

    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel();
    });

    let result =
        Pipeline::run_with_cancel(&def, ctx, workspace.path(), ExecutorConfig::default(), cancel)
            .await
            .unwrap();

    assert_eq!(result.status, PipelineStatus::Failed);
    let unit = &result.stages[0].jobs[0];
    assert_eq!(unit.status, JobStatus::Failed);
    assert!(unit.error.as_deref().unwrap_or("").contains("cancelled"));
    assert!(!unit.infrastructure);
    assert!(
        workspace.path().join("qa/unit/cleanup.txt").exists(),
        "cleanup must still run after cancellation"
    );
    assert!(render_summary(&result).contains("unit"));
    assert!(result.duration_ms < 10_000, "the sleep must be interrupted");
}

/// Report rows follow definition order even when skipped and executed
/// jobs are interleaved in one stage.
#[tokio::test]
async fn test_stage_report_preserves_definition_order() {
    let result = run(
        r#"
stages: [qa]
jobs:
  qa:
    nightly:
      script: ["echo nightly"]
      only: ["tags"]
    unit:
      script: ["echo tests ok"]
    canary:
      script: ["echo canary"]
      except: ["branches"]
"#,
        branch("main"),
    )
    .await;

    assert!(result.succeeded());
    let names: Vec<&str> = result.stages[0]
        .jobs
        .iter()
        .map(|j| j.job_name.as_str())
        .collect();
    assert_eq!(names, ["nightly", "unit", "canary"]);
    assert_eq!(result.stages[0].jobs[1].status, JobStatus::Succeeded);
    assert_eq!(result.stages[0].jobs[2].status, JobStatus::Skipped);
}

/// A glob-style coverage binding reaches the merge through the concrete
/// paths it matched at collection time.
#[tokio::test]
async fn test_glob_coverage_binding_is_aggregated() {
    let result = run(
        r#"
stages: [qa]
jobs:
  qa:
    unit:
      script:
        - "mkdir -p cov"
        - 'echo ''{"job":"unit","files":{"src/app.py":{"lines":{"1":1}}}}'' > cov/unit.json'
      artifacts:
        reports:
          coverage_report: cov/*.json
"#,
        branch("main"),
    )
    .await;

    assert!(result.succeeded());
    assert_eq!(result.coverage.covered_lines(), 1);
}

/// A job that strictly requires an artifact fails when no prior job
/// produced it, instead of running against a half-empty workspace.
#[tokio::test]
async fn test_strict_dependency_unmet_fails_job() {
    let result = run(
        r#"
stages: [build, release]
jobs:
  build:
    compile:
      script: ["echo built"]
  release:
    publish:
      script: ["echo never > published.txt"]
      needs: ["dist/*.whl"]
"#,
        tag("1.0.0"),
    )
    .await;

    assert_eq!(result.status, PipelineStatus::Failed);
    let publish = &result.stages[1].jobs[0];
    assert_eq!(publish.status, JobStatus::Failed);
    assert!(publish.error.as_deref().unwrap_or("").contains("dist/*.whl"));
}

/// Coverage records from independent test jobs are merged into one report.
#[tokio::test]
async fn test_coverage_aggregated_across_jobs() {
    let result = run(
        r#"
stages: [qa]
jobs:
  qa:
    unit:
      script:
        - 'echo ''{"job":"unit","files":{"src/app.py":{"lines":{"1":1,"2":0}}}}'' > coverage.json'
      artifacts:
        reports:
          coverage_report: coverage.json
    integration:
      script:
        - 'echo ''{"job":"integration","files":{"src/app.py":{"lines":{"2":2,"3":1}}}}'' > coverage.json'
      artifacts:
        reports:
          coverage_report: coverage.json
"#,
        branch("main"),
    )
    .await;

    assert!(result.succeeded());
    let file = &result.coverage.files["src/app.py"];
    assert_eq!(file.lines[&1], 1);
    assert_eq!(file.lines[&2], 2, "covered-in-any-record wins");
    assert_eq!(file.lines[&3], 1);
    assert_eq!(result.coverage.covered_lines(), 3);
}

/// Partial coverage from a failing test job still reaches the report.
#[tokio::test]
async fn test_coverage_survives_failing_job() {
    let result = run(
        r#"
stages: [qa]
jobs:
  qa:
    unit:
      script:
        - 'echo ''{"job":"unit","files":{"src/app.py":{"lines":{"1":1}}}}'' > coverage.json'
        - "exit 1"
      artifacts:
        reports:
          coverage_report: coverage.json
"#,
        branch("main"),
    )
    .await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.coverage.covered_lines(), 1);
}

/// A malformed coverage record is excluded with a warning; the merge and
/// the pipeline both carry on.
#[tokio::test]
async fn test_malformed_coverage_record_is_warning_not_failure() {
    let result = run(
        r#"
stages: [qa]
jobs:
  qa:
    unit:
      script:
        - 'echo ''{"job":"unit","files":{"src/app.py":{"lines":{"1":1}}}}'' > coverage.json'
      artifacts:
        reports:
          coverage_report: coverage.json
    integration:
      script:
        - "echo garbage > coverage.json"
      artifacts:
        reports:
          coverage_report: coverage.json
"#,
        branch("main"),
    )
    .await;

    assert!(result.succeeded(), "merge failures must not fail the pipeline");
    assert_eq!(result.coverage.covered_lines(), 1);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("integration"));
}

/// Pipeline with no coverage bindings yields an empty report, not an error.
#[tokio::test]
async fn test_no_coverage_records_is_empty_report() {
    let result = run(
        "stages: [qa]\njobs:\n  qa:\n    unit:\n      script: [\"true\"]\n",
        branch("main"),
    )
    .await;

    assert!(result.succeeded());
    assert!(result.coverage.is_empty());
    assert_eq!(result.coverage.line_rate(), 0.0);
}

/// Report renderers cover the full run.
#[tokio::test]
async fn test_report_outputs() {
    let result = run(
        r#"
stages: [qa]
jobs:
  qa:
    unit:
      script: ["echo ok"]
"#,
        branch("main"),
    )
    .await;

    let summary = render_summary(&result);
    assert!(summary.contains("unit"));
    assert!(summary.contains("SUCCEEDED"));

    let json = to_json(&result);
    assert_eq!(json["status"], "succeeded");
    assert_eq!(json["stages"][0]["jobs"][0]["job_name"], "unit");
}

/// Credentials from the context reach the job environment but never the
/// logs or the report.
#[tokio::test]
async fn test_credentials_reach_env_but_not_report() {
    let def = PipelineDefinition::from_yaml(
        r#"
stages: [release]
jobs:
  release:
    publish:
      script: ["test -n \"$CONVEYOR_REGISTRY_PASSWORD\"", "echo authorized"]
"#,
    )
    .unwrap();

    let ctx = RunContext::new(tag("1.0.0"), "abc123").with_credentials(
        conveyor_core::Credentials::new(Some("bot".to_string()), Some("s3cret".to_string())),
    );
    let workspace = tempfile::tempdir().unwrap();
    let result = Pipeline::run(&def, ctx, workspace.path(), ExecutorConfig::default())
        .await
        .unwrap();

    assert!(result.succeeded(), "credentials must be visible to steps");
    let rendered = format!("{}{}", render_summary(&result), to_json(&result));
    assert!(
        !rendered.contains("s3cret"),
        "secret must never appear in any report output"
    );
}
