//! Pipeline domain model

use crate::core::{config::PipelineConfig, job::Job};
use crate::trigger::TriggerPolicy;
use std::collections::BTreeMap;

/// A pipeline definition
///
/// Immutable once built; every run reads it concurrently.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Which events start a run
    pub trigger: TriggerPolicy,

    /// Environment shared by all jobs
    pub env: BTreeMap<String, String>,

    /// Upper bound on concurrently executing jobs
    pub max_parallel_jobs: Option<usize>,

    /// Jobs in declared order
    pub jobs: Vec<Job>,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        Pipeline {
            name: config.name.clone(),
            trigger: TriggerPolicy::new(
                config.trigger.events.iter().copied(),
                config.trigger.branches.iter().cloned(),
            ),
            env: config.env_as_string_map(),
            max_parallel_jobs: config.max_parallel_jobs,
            jobs: config.jobs.iter().map(Job::from_config).collect(),
        }
    }

    /// Create a pipeline with the default trigger policy
    pub fn new(name: impl Into<String>, jobs: Vec<Job>) -> Self {
        Pipeline {
            name: name.into(),
            trigger: TriggerPolicy::default(),
            env: BTreeMap::new(),
            max_parallel_jobs: None,
            jobs,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Get a job by ID
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Total number of steps across all jobs
    pub fn step_count(&self) -> usize {
        self.jobs.iter().map(|j| j.steps.len()).sum()
    }
}
