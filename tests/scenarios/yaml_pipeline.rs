//! Test: YAML pipeline - a descriptor parsed, admitted and run end to end

use crate::helpers::*;
use ci_pipeline::cache::MemoryCacheStore;
use ci_pipeline::core::config::PipelineConfig;
use ci_pipeline::core::{RunStatus, StepOutcome};
use ci_pipeline::execution::{EventBus, PipelineScheduler};
use ci_pipeline::trigger::{EventKind, TriggerEvent};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CI_YAML: &str = r#"
name: "CI"
on:
  events: [push, pull_request]
  branches: [main]
env:
  RUSTFLAGS: "-D warnings"
  CARGO_TERM_COLOR: always
jobs:
  - id: "tests"
    platform: "ubuntu-latest"
    env:
      CARGO_INCREMENTAL: 0
    steps:
      - id: "deps"
        if: "platform == linux"
        run: "sudo apt-get install -y libasound2-dev libudev-dev"
      - id: "test"
        run: "cargo test --workspace"
  - id: "tests-windows"
    platform: "windows-latest"
    env:
      RUSTFLAGS: "-C target-feature=+crt-static"
    steps:
      - id: "deps"
        if: "platform == linux"
        run: "sudo apt-get install -y libasound2-dev libudev-dev"
      - id: "test"
        run: "cargo test --workspace"
  - id: "docs"
    steps:
      - id: "doc"
        if: "env.CARGO_TERM_COLOR != never"
        run: "cargo doc --no-deps"
        cache:
          key: "docs-{{ platform }}"
          inputs: ["Cargo.lock"]
          salt: "v2"
"#;

#[tokio::test]
async fn test_descriptor_runs_end_to_end() {
    let pipeline = PipelineConfig::from_yaml(CI_YAML).unwrap().to_pipeline();
    let executor = ScriptedExecutor::new();

    let result = run_pipeline(&pipeline, executor.clone()).await;

    assert_run_status(&result, RunStatus::Success);
    assert_eq!(result.pipeline_name, "CI");
    let order: Vec<_> = result.jobs.iter().map(|j| j.job_id.as_str()).collect();
    assert_eq!(order, vec!["tests", "tests-windows", "docs"]);

    assert_eq!(executor.steps_run("tests"), vec!["deps", "test"]);
    assert_eq!(executor.steps_run("tests-windows"), vec!["test"]);
    assert_step_skipped(&result, "tests-windows", "deps");
    assert_step_outcome(&result, "docs", "doc", &StepOutcome::Succeeded);
}

#[tokio::test]
async fn test_environment_layers() {
    let pipeline = PipelineConfig::from_yaml(CI_YAML).unwrap().to_pipeline();
    let executor = ScriptedExecutor::new();
    let workspace = tempfile::tempdir().unwrap();

    let mut host = BTreeMap::new();
    host.insert("PATH".to_string(), "/usr/bin".to_string());
    host.insert("RUSTFLAGS".to_string(), "".to_string());

    let scheduler = PipelineScheduler::new(runner(
        executor.clone(),
        Arc::new(MemoryCacheStore::new()),
        workspace.path(),
        EventBus::new(),
    ));
    let result = scheduler
        .run(&pipeline, None, &host, &CancellationToken::new())
        .await;
    assert_run_status(&result, RunStatus::Success);

    let env_of = |job: &str| {
        executor
            .calls()
            .into_iter()
            .find(|c| c.job_id == job)
            .map(|c| c.env)
            .unwrap()
    };

    let linux = env_of("tests");
    assert_eq!(linux["PATH"], "/usr/bin");
    assert_eq!(linux["RUSTFLAGS"], "-D warnings");
    assert_eq!(linux["CARGO_INCREMENTAL"], "0");
    assert_eq!(linux["CARGO_TERM_COLOR"], "always");

    let windows = env_of("tests-windows");
    assert_eq!(windows["RUSTFLAGS"], "-C target-feature=+crt-static");
    assert!(!windows.contains_key("CARGO_INCREMENTAL"));
}

#[tokio::test]
async fn test_trigger_policy_from_descriptor() {
    let pipeline = PipelineConfig::from_yaml(CI_YAML).unwrap().to_pipeline();

    let push_main = TriggerEvent::new(EventKind::Push, "refs/heads/main").unwrap();
    let pr_main = TriggerEvent::new(EventKind::PullRequest, "main").unwrap();
    let push_feature = TriggerEvent::new(EventKind::Push, "feature/audio").unwrap();

    assert!(pipeline.trigger.admits(&push_main));
    assert!(pipeline.trigger.admits(&pr_main));
    assert!(!pipeline.trigger.admits(&push_feature));
    assert!(pipeline
        .trigger
        .evaluate(r#"{"kind": "push", "branch": 42}"#)
        .is_err());

    let result = PipelineScheduler::new(runner(
        ScriptedExecutor::new(),
        Arc::new(MemoryCacheStore::new()),
        &std::env::temp_dir(),
        EventBus::new(),
    ))
    .run(&pipeline, Some(push_main.clone()), &BTreeMap::new(), &CancellationToken::new())
    .await;
    assert_eq!(result.trigger, Some(push_main));
}

#[test]
fn test_rejects_job_dependencies() {
    let yaml = r#"
name: "CI"
jobs:
  - id: "build"
    steps:
      - id: "b"
        run: "cargo build"
  - id: "test"
    needs: ["build"]
    steps:
      - id: "t"
        run: "cargo test"
"#;
    let err = PipelineConfig::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("independent"));
}
