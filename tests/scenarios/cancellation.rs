//! Test: Cancellation - interrupted runs end Cancelled and never cache partial work

use crate::helpers::*;
use ci_pipeline::cache::{CacheStore, MemoryCacheStore};
use ci_pipeline::core::{CacheDirective, Job, Pipeline, Platform, RunStatus, Step, StepOutcome};
use ci_pipeline::execution::EventBus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn cancel_after(delay: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.cancel();
    });
    cancel
}

/// In-flight steps are interrupted and the run exits with 130
#[tokio::test]
async fn test_cancel_in_flight_run() {
    let executor = ScriptedExecutor::new()
        .script("cargo test", Script::ok("").slow(Duration::from_secs(30)))
        .script("cargo doc", Script::ok("").slow(Duration::from_secs(30)));
    let pipeline = Pipeline::new(
        "CI",
        vec![
            Job::new(
                "tests",
                Platform::Linux,
                vec![Step::new("test", "cargo test"), Step::new("bench", "cargo bench")],
            ),
            Job::new("docs", Platform::Linux, vec![Step::new("doc", "cargo doc")]),
        ],
    );
    let workspace = tempfile::tempdir().unwrap();

    let start = Instant::now();
    let result = run_pipeline_with(
        &pipeline,
        executor.clone(),
        Arc::new(MemoryCacheStore::new()),
        workspace.path(),
        EventBus::new(),
        &cancel_after(Duration::from_millis(50)),
    )
    .await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_run_status(&result, RunStatus::Cancelled);
    assert_eq!(result.exit_code(), 130);
    assert_job_cancelled(&result, "tests");
    assert_job_cancelled(&result, "docs");
    assert_step_outcome(&result, "tests", "test", &StepOutcome::Cancelled);
    assert_step_absent(&result, "tests", "bench");
    assert_eq!(executor.call_count(), 2);
}

/// A step that finishes after cancellation does not populate the cache
#[tokio::test]
async fn test_no_cache_entry_after_cancel() {
    let executor = ScriptedExecutor::new().script(
        "cargo build",
        Script::ok("Compiling")
            .slow(Duration::from_millis(200))
            .ignoring_cancel(),
    );
    let cache = Arc::new(MemoryCacheStore::new());
    let directive = CacheDirective {
        key_template: "build-{{ job }}".to_string(),
        inputs: vec![],
        salt: String::new(),
        path: None,
        restore_only: true,
    };
    let pipeline = Pipeline::new(
        "CI",
        vec![Job::new(
            "tests",
            Platform::Linux,
            vec![
                Step::new("build", "cargo build").with_cache(directive),
                Step::new("test", "cargo test"),
            ],
        )],
    );
    let workspace = tempfile::tempdir().unwrap();
    let store: Arc<dyn CacheStore> = cache.clone();

    let result = run_pipeline_with(
        &pipeline,
        executor.clone(),
        store,
        workspace.path(),
        EventBus::new(),
        &cancel_after(Duration::from_millis(20)),
    )
    .await;

    assert_run_status(&result, RunStatus::Cancelled);
    assert_step_outcome(&result, "tests", "build", &StepOutcome::Succeeded);
    assert_step_absent(&result, "tests", "test");
    assert!(cache.is_empty().await, "cancelled run must not store entries");
    assert_eq!(executor.steps_run("tests"), vec!["build"]);
}

/// Cancelling before the run starts produces a result for every job
#[tokio::test]
async fn test_cancel_before_start() {
    let executor = ScriptedExecutor::new();
    let pipeline = Pipeline::new(
        "CI",
        vec![
            Job::new("lints", Platform::Linux, vec![Step::new("fmt", "cargo fmt --check")]),
            Job::new("tests", Platform::Linux, vec![Step::new("test", "cargo test")]),
        ],
    );
    let cancel = CancellationToken::new();
    cancel.cancel();
    let workspace = tempfile::tempdir().unwrap();

    let result = run_pipeline_with(
        &pipeline,
        executor.clone(),
        Arc::new(MemoryCacheStore::new()),
        workspace.path(),
        EventBus::new(),
        &cancel,
    )
    .await;

    assert_run_status(&result, RunStatus::Cancelled);
    assert_eq!(result.jobs.len(), 2);
    assert_job_cancelled(&result, "lints");
    assert_job_cancelled(&result, "tests");
    assert_eq!(executor.call_count(), 0);
}
