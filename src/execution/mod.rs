//! Pipeline execution: scheduling jobs, running their steps, executing commands

pub mod events;
pub mod executor;
pub mod runner;
pub mod scheduler;

pub use events::{EventBus, EventHandler, ExecutionEvent};
pub use executor::{Shell, ShellExecutor, StepExecutor};
pub use runner::JobRunner;
pub use scheduler::PipelineScheduler;
