//! ci-pipeline - run CI pipelines: concurrent jobs, fail-fast steps, cached artifacts

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod trigger;

// Re-export commonly used types
pub use cache::{CacheKey, CacheStore, FileCacheStore, MemoryCacheStore};
pub use core::{ExecutionContext, Job, JobResult, Pipeline, RunResult, RunStatus, Step, StepOutcome, StepResult};
pub use execution::{EventBus, ExecutionEvent, JobRunner, PipelineScheduler, ShellExecutor, StepExecutor};
pub use trigger::{EventKind, TriggerEvent, TriggerPolicy};
