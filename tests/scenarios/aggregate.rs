//! Test: Aggregation - one result per job, in declared order, folded into a run status

use crate::helpers::*;
use ci_pipeline::cache::MemoryCacheStore;
use ci_pipeline::core::{FailureKind, Job, JobOutcome, Pipeline, Platform, RunStatus, Step};
use ci_pipeline::execution::EventBus;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn job(id: &str, command: &str) -> Job {
    Job::new(id, Platform::Linux, vec![Step::new("run", command)])
}

/// Results follow declaration order even when later jobs finish first
#[tokio::test]
async fn test_results_in_declared_order() {
    let ids = ["first", "second", "third", "fourth", "fifth"];
    let mut executor = ScriptedExecutor::new();
    for (i, id) in ids.iter().enumerate() {
        let delay = Duration::from_millis(25 * (ids.len() - i) as u64);
        executor = executor.script(&format!("make {}", id), Script::ok(id).slow(delay));
    }
    let pipeline = Pipeline::new(
        "CI",
        ids.iter().map(|id| job(id, &format!("make {}", id))).collect(),
    );

    let result = run_pipeline(&pipeline, executor).await;

    assert_run_status(&result, RunStatus::Success);
    let order: Vec<_> = result.jobs.iter().map(|j| j.job_id.as_str()).collect();
    assert_eq!(order, ids);
}

/// Exit code is 0 only when every job succeeded
#[tokio::test]
async fn test_any_failure_fails_run() {
    let executor = ScriptedExecutor::new().script("cargo deny check", Script::fail(2, "banned crate"));
    let pipeline = Pipeline::new(
        "CI",
        vec![
            job("tests", "cargo test"),
            job("deny", "cargo deny check"),
            job("docs", "cargo doc"),
        ],
    );

    let result = run_pipeline(&pipeline, executor).await;

    assert_run_status(&result, RunStatus::Failure);
    assert_eq!(result.exit_code(), 1);
    assert_eq!(result.jobs.len(), 3);
    assert_eq!(result.verification_failures().len(), 1);
    assert_eq!(result.verification_failures()[0].job_id, "deny");
}

/// Green pipeline exits 0
#[tokio::test]
async fn test_all_success() {
    let pipeline = Pipeline::new("CI", vec![job("tests", "cargo test"), job("docs", "cargo doc")]);

    let result = run_pipeline(&pipeline, ScriptedExecutor::new()).await;

    assert_run_status(&result, RunStatus::Success);
    assert_eq!(result.exit_code(), 0);
    assert!(result.is_success());
}

/// A job task that dies is an infrastructure failure for that job only
#[tokio::test]
async fn test_panicking_job_is_contained() {
    let executor = ScriptedExecutor::new()
        .script("cargo miri test", Script::panic())
        .script("cargo test", Script::ok("ok").slow(Duration::from_millis(50)));
    let pipeline = Pipeline::new(
        "CI",
        vec![job("miri", "cargo miri test"), job("tests", "cargo test")],
    );

    let result = run_pipeline(&pipeline, executor).await;

    assert_run_status(&result, RunStatus::Failure);
    assert_job_succeeded(&result, "tests");
    let miri = result.job("miri").unwrap();
    assert_eq!(
        miri.outcome,
        JobOutcome::Failure {
            kind: FailureKind::Infrastructure,
            step_id: None
        }
    );
    assert_eq!(result.infrastructure_failures().len(), 1);
    assert!(result.verification_failures().is_empty());
}

/// Timeouts count as verification failures in the report
#[tokio::test]
async fn test_failure_classes_are_separated() {
    let executor = ScriptedExecutor::new()
        .script("cargo test", Script::timeout(60_000))
        .script("cargo fetch", Script::infrastructure("network unreachable"));
    let pipeline = Pipeline::new(
        "CI",
        vec![job("tests", "cargo test"), job("fetch", "cargo fetch"), job("docs", "cargo doc")],
    );

    let result = run_pipeline(&pipeline, executor).await;

    assert_run_status(&result, RunStatus::Failure);
    let verification: Vec<_> = result
        .verification_failures()
        .iter()
        .map(|j| j.job_id.clone())
        .collect();
    let infrastructure: Vec<_> = result
        .infrastructure_failures()
        .iter()
        .map(|j| j.job_id.clone())
        .collect();
    assert_eq!(verification, vec!["tests"]);
    assert_eq!(infrastructure, vec!["fetch"]);
}

/// A failed job keeps the run a failure when its siblings are cancelled afterwards
#[tokio::test]
async fn test_failure_survives_cancellation() {
    let executor = ScriptedExecutor::new()
        .script("cargo clippy", Script::fail(1, "warning: unused import"))
        .script("cargo test", Script::ok("").slow(Duration::from_secs(30)));
    let pipeline = Pipeline::new(
        "CI",
        vec![job("lints", "cargo clippy"), job("tests", "cargo test")],
    );
    let workspace = tempfile::tempdir().unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = run_pipeline_with(
        &pipeline,
        executor,
        Arc::new(MemoryCacheStore::new()),
        workspace.path(),
        EventBus::new(),
        &cancel,
    )
    .await;

    assert_job_failed_at(&result, "lints", "run", FailureKind::Verification);
    assert_job_cancelled(&result, "tests");
    assert_run_status(&result, RunStatus::Failure);
    assert_eq!(result.exit_code(), 1);
}
