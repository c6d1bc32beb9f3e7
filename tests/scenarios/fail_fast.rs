//! Test: Fail-fast - the first failing step stops its job and nothing else

use crate::helpers::*;
use ci_pipeline::core::{FailureKind, Job, Pipeline, Platform, RunStatus, Step, StepOutcome};
use std::time::Duration;

fn lints_job() -> Job {
    Job::new(
        "lints",
        Platform::Linux,
        vec![
            Step::new("fmt", "cargo fmt --all -- --check"),
            Step::new("clippy", "cargo clippy -- -D warnings"),
            Step::new("deny", "cargo deny check"),
        ],
    )
}

/// Step k fails, steps k+1.. never run
#[tokio::test]
async fn test_failing_step_stops_job() {
    let executor = ScriptedExecutor::new().script(
        "cargo clippy -- -D warnings",
        Script::fail(101, "error: this could be a `const fn`"),
    );
    let pipeline = Pipeline::new("CI", vec![lints_job()]);

    let result = run_pipeline(&pipeline, executor.clone()).await;

    assert_run_status(&result, RunStatus::Failure);
    assert_job_failed_at(&result, "lints", "clippy", FailureKind::Verification);
    assert_step_absent(&result, "lints", "deny");
    assert_eq!(executor.steps_run("lints"), vec!["fmt", "clippy"]);

    let failing = result.job("lints").unwrap().failing_step().unwrap();
    assert_eq!(failing.exit_code(), Some(101));
    assert!(failing.output.contains("const fn"));
}

/// A failure in the first step leaves no other step results
#[tokio::test]
async fn test_first_step_failure() {
    let executor = ScriptedExecutor::new()
        .script("cargo fmt --all -- --check", Script::fail(1, "Diff in src/lib.rs"));
    let pipeline = Pipeline::new("CI", vec![lints_job()]);

    let result = run_pipeline(&pipeline, executor.clone()).await;

    assert_job_failed_at(&result, "lints", "fmt", FailureKind::Verification);
    assert_eq!(result.job("lints").unwrap().steps.len(), 1);
    assert_eq!(executor.call_count(), 1);
}

/// Timeouts stop the job and are reported as their own failure kind
#[tokio::test]
async fn test_timeout_is_fatal() {
    let executor = ScriptedExecutor::new().script("cargo clippy -- -D warnings", Script::timeout(600_000));
    let pipeline = Pipeline::new("CI", vec![lints_job()]);

    let result = run_pipeline(&pipeline, executor).await;

    assert_job_failed_at(&result, "lints", "clippy", FailureKind::Timeout);
    assert_step_outcome(&result, "lints", "clippy", &StepOutcome::TimedOut { after_ms: 600_000 });
    assert_step_absent(&result, "lints", "deny");
    assert_eq!(result.verification_failures().len(), 1);
    assert!(result.infrastructure_failures().is_empty());
}

/// Infrastructure failures are not retried and are classified apart
#[tokio::test]
async fn test_infrastructure_failure_is_fatal() {
    let executor = ScriptedExecutor::new()
        .script("cargo fmt --all -- --check", Script::infrastructure("failed to spawn 'sh'"));
    let pipeline = Pipeline::new("CI", vec![lints_job()]);

    let result = run_pipeline(&pipeline, executor.clone()).await;

    assert_job_failed_at(&result, "lints", "fmt", FailureKind::Infrastructure);
    assert_eq!(executor.call_count(), 1);
    assert_eq!(result.infrastructure_failures().len(), 1);
    assert!(result.verification_failures().is_empty());
}

/// One job failing fast never stops its siblings
#[tokio::test]
async fn test_failure_does_not_cancel_siblings() {
    let executor = ScriptedExecutor::new()
        .script("cargo fmt --all -- --check", Script::fail(1, "Diff"))
        .script("cargo test", Script::ok("test result: ok").slow(Duration::from_millis(100)))
        .script("cargo doc", Script::ok("Documenting").slow(Duration::from_millis(150)));

    let pipeline = Pipeline::new(
        "CI",
        vec![
            lints_job(),
            Job::new("tests", Platform::Linux, vec![Step::new("test", "cargo test")]),
            Job::new("docs", Platform::Linux, vec![Step::new("doc", "cargo doc")]),
        ],
    );

    let result = run_pipeline(&pipeline, executor).await;

    assert_run_status(&result, RunStatus::Failure);
    assert_job_failed_at(&result, "lints", "fmt", FailureKind::Verification);
    assert_job_succeeded(&result, "tests");
    assert_job_succeeded(&result, "docs");
}
