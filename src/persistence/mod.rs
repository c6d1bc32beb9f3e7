//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{JobOutcome, RunResult, RunStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Aggregate status
    pub status: RunStatus,

    /// Event that started the run, e.g. `push@main`
    pub trigger: Option<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    pub total_jobs: usize,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,

    /// Jobs that failed, in declared order
    pub failed_job_ids: Vec<String>,
}

impl RunSummary {
    /// Create a summary from a run result
    pub fn from_result(result: &RunResult) -> Self {
        let count = |pred: fn(&JobOutcome) -> bool| {
            result.jobs.iter().filter(|j| pred(&j.outcome)).count()
        };

        Self {
            run_id: result.run_id,
            pipeline_name: result.pipeline_name.clone(),
            status: result.status,
            trigger: result
                .trigger
                .as_ref()
                .map(|t| format!("{}@{}", t.kind, t.branch)),
            started_at: result.started_at,
            finished_at: result.finished_at,
            total_jobs: result.jobs.len(),
            succeeded_jobs: count(|o| *o == JobOutcome::Success),
            failed_jobs: count(|o| matches!(o, JobOutcome::Failure { .. })),
            cancelled_jobs: count(|o| *o == JobOutcome::Cancelled),
            failed_job_ids: result
                .jobs
                .iter()
                .filter(|j| matches!(j.outcome, JobOutcome::Failure { .. }))
                .map(|j| j.job_id.clone())
                .collect(),
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Most recent runs first, optionally for one pipeline
    async fn list_runs(&self, pipeline_name: Option<&str>, limit: usize) -> Result<Vec<RunSummary>>;

    /// Number of recorded runs of a pipeline
    async fn count_runs(&self, pipeline_name: &str) -> Result<usize>;

    /// List all pipeline names, sorted
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|r| pipeline_name.map_or(true, |name| r.pipeline_name == name))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn count_runs(&self, pipeline_name: &str) -> Result<usize> {
        let runs = self.runs.read().await;
        Ok(runs.values().filter(|r| r.pipeline_name == pipeline_name).count())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
