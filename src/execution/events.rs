//! Events emitted while a run progresses

use crate::core::{JobOutcome, RunStatus, StepOutcome};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        job_count: usize,
    },
    JobStarted {
        job_id: String,
    },
    StepStarted {
        job_id: String,
        step_id: String,
    },
    StepSkipped {
        job_id: String,
        step_id: String,
        reason: String,
    },
    CacheHit {
        job_id: String,
        step_id: String,
        key: String,
    },
    CacheMiss {
        job_id: String,
        step_id: String,
        key: String,
    },
    CacheStored {
        job_id: String,
        step_id: String,
        key: String,
    },
    StepFinished {
        job_id: String,
        step_id: String,
        outcome: StepOutcome,
        duration: Duration,
    },
    JobFinished {
        job_id: String,
        outcome: JobOutcome,
        duration: Duration,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of events to registered handlers
///
/// Cloning shares the handler list; handlers are registered before a run
/// starts and called from whichever job task produced the event.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Vec<EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event handler
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.handlers).push(Arc::new(handler));
        self
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        for handler in self.handlers.iter() {
            handler(event.clone());
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
