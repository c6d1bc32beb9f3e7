//! Test: Skip semantics - false predicates skip steps without affecting pass/fail

use crate::helpers::*;
use ci_pipeline::core::{Job, Pipeline, Platform, Predicate, RunStatus, Step};

fn linux_only(step: Step) -> Step {
    step.with_condition(Predicate::parse("platform == linux").unwrap())
}

/// The native-deps install step only runs on Linux
#[tokio::test]
async fn test_platform_predicate() {
    let executor = ScriptedExecutor::new();
    let steps = vec![
        linux_only(Step::new("deps", "sudo apt-get install -y libasound2-dev")),
        Step::new("test", "cargo test"),
    ];
    let pipeline = Pipeline::new(
        "CI",
        vec![
            Job::new("tests-linux", Platform::Linux, steps.clone()),
            Job::new("tests-windows", Platform::Windows, steps.clone()),
            Job::new("tests-macos", Platform::Macos, steps),
        ],
    );

    let result = run_pipeline(&pipeline, executor.clone()).await;

    assert_run_status(&result, RunStatus::Success);
    assert_eq!(executor.steps_run("tests-linux"), vec!["deps", "test"]);
    assert_eq!(executor.steps_run("tests-windows"), vec!["test"]);
    assert_eq!(executor.steps_run("tests-macos"), vec!["test"]);
    assert_step_skipped(&result, "tests-windows", "deps");
    assert_step_skipped(&result, "tests-macos", "deps");
}

/// A skipped step that would have failed does not fail the job
#[tokio::test]
async fn test_skipped_failure_is_harmless() {
    let executor = ScriptedExecutor::new().script("exit 1", Script::fail(1, "boom"));
    let pipeline = Pipeline::new(
        "CI",
        vec![Job::new(
            "docs",
            Platform::Linux,
            vec![
                Step::new("broken", "exit 1").with_condition(Predicate::Never),
                Step::new("doc", "cargo doc"),
            ],
        )],
    );

    let result = run_pipeline(&pipeline, executor.clone()).await;

    assert_run_status(&result, RunStatus::Success);
    assert_step_skipped(&result, "docs", "broken");
    assert_eq!(executor.steps_run("docs"), vec!["doc"]);
}

/// Environment predicates see the merged job environment
#[tokio::test]
async fn test_env_predicate() {
    let executor = ScriptedExecutor::new();
    let steps = vec![
        Step::new("upload", "upload-docs")
            .with_condition(Predicate::parse("env.PUBLISH == 'yes'").unwrap()),
        Step::new("doc", "cargo doc"),
    ];
    let pipeline = Pipeline::new(
        "CI",
        vec![
            Job::new("docs", Platform::Linux, steps.clone()).with_env("PUBLISH", "yes"),
            Job::new("docs-preview", Platform::Linux, steps),
        ],
    )
    .with_env("PUBLISH", "no");

    let result = run_pipeline(&pipeline, executor.clone()).await;

    assert_run_status(&result, RunStatus::Success);
    assert_eq!(executor.steps_run("docs"), vec!["upload", "doc"]);
    assert_step_skipped(&result, "docs-preview", "upload");
}

/// A job whose every step is skipped still succeeds
#[tokio::test]
async fn test_all_steps_skipped() {
    let executor = ScriptedExecutor::new();
    let pipeline = Pipeline::new(
        "CI",
        vec![Job::new(
            "tests",
            Platform::Windows,
            vec![linux_only(Step::new("deps", "apt-get install -y libudev-dev"))],
        )],
    );

    let result = run_pipeline(&pipeline, executor.clone()).await;

    assert_run_status(&result, RunStatus::Success);
    assert_step_skipped(&result, "tests", "deps");
    assert_eq!(executor.call_count(), 0);
}
