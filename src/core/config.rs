//! Pipeline configuration from YAML

use crate::core::{condition::Predicate, job::Platform, Pipeline};
use crate::trigger::EventKind;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Which events start a run
    #[serde(rename = "on", default)]
    pub trigger: TriggerConfig,

    /// Environment shared by every job
    #[serde(default)]
    env: BTreeMap<String, Value>,

    /// Upper bound on jobs executing at once (unbounded when absent)
    #[serde(default)]
    pub max_parallel_jobs: Option<usize>,

    /// Jobs, all started concurrently
    pub jobs: Vec<JobConfig>,
}

/// Trigger filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Admitted event kinds
    #[serde(default = "default_events")]
    pub events: Vec<EventKind>,

    /// Admitted branch names (exact match)
    #[serde(default = "default_branches")]
    pub branches: Vec<String>,
}

fn default_events() -> Vec<EventKind> {
    vec![EventKind::Push, EventKind::PullRequest]
}

fn default_branches() -> Vec<String> {
    vec!["main".to_string()]
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            events: default_events(),
            branches: default_branches(),
        }
    }
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job identifier
    pub id: String,

    /// Human-readable job name
    #[serde(default)]
    pub name: Option<String>,

    /// Target platform or runner label
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Environment overrides for this job
    #[serde(default)]
    env: BTreeMap<String, Value>,

    /// Working directory relative to the workspace root
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Timeout for each step of this job (in seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Jobs never depend on each other; any entry here is rejected
    #[serde(default, alias = "depends_on")]
    pub needs: Vec<String>,

    /// Steps in execution order
    pub steps: Vec<StepConfig>,
}

fn default_platform() -> String {
    "linux".to_string()
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step identifier, unique within its job
    pub id: String,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command to run
    pub run: String,

    /// Activation predicate
    #[serde(rename = "if", alias = "run_if", default)]
    pub run_if: Option<String>,

    /// Cache directive
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    /// Timeout for this step (overrides the job timeout)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Cache directive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Key template, e.g. `cargo-{{ platform }}-{{ env.RUSTFLAGS }}`
    pub key: String,

    /// Files hashed into the key
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Salt mixed into the key; change it to invalidate
    #[serde(default)]
    pub salt: String,

    /// Artifact file to store and restore
    #[serde(default)]
    pub path: Option<String>,

    /// Whether a cache hit may replace running the command
    #[serde(default)]
    pub restore_only: bool,
}

/// Render a scalar YAML value as an environment variable value
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn env_as_string_map(env: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    env.iter()
        .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
        .collect()
}

fn validate_env(scope: &str, env: &BTreeMap<String, Value>) -> Result<()> {
    for (key, value) in env {
        if key.is_empty() || key.contains('=') {
            anyhow::bail!("{} has invalid environment variable name '{}'", scope, key);
        }
        if scalar_to_string(value).is_none() {
            anyhow::bail!(
                "{} environment variable '{}' must be a string, number or boolean",
                scope,
                key
            );
        }
    }
    Ok(())
}

impl JobConfig {
    /// Get the job's env overrides as a string map
    pub fn env_as_string_map(&self) -> BTreeMap<String, String> {
        env_as_string_map(&self.env)
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            anyhow::bail!("Pipeline '{}' declares no jobs", self.name);
        }

        if self.max_parallel_jobs == Some(0) {
            anyhow::bail!("max_parallel_jobs must be at least 1");
        }

        if self.trigger.branches.iter().any(|b| b.trim().is_empty()) {
            anyhow::bail!("Trigger branch filter contains an empty branch name");
        }

        validate_env("Pipeline", &self.env)?;

        let mut seen_jobs = HashSet::new();
        for job in &self.jobs {
            if !seen_jobs.insert(&job.id) {
                anyhow::bail!("Duplicate job ID: {}", job.id);
            }

            if !job.needs.is_empty() {
                anyhow::bail!(
                    "Job '{}' declares dependencies on {:?}; jobs must be independent",
                    job.id,
                    job.needs
                );
            }

            if Platform::parse(&job.platform).is_none() {
                anyhow::bail!("Job '{}' has unknown platform '{}'", job.id, job.platform);
            }

            validate_env(&format!("Job '{}'", job.id), &job.env)?;

            let mut seen_steps = HashSet::new();
            for step in &job.steps {
                if !seen_steps.insert(&step.id) {
                    anyhow::bail!("Duplicate step ID '{}' in job '{}'", step.id, job.id);
                }

                if step.run.trim().is_empty() {
                    anyhow::bail!("Step '{}' in job '{}' has an empty command", step.id, job.id);
                }

                if let Some(expr) = &step.run_if {
                    Predicate::parse(expr).map_err(|e| {
                        anyhow::anyhow!("Step '{}' in job '{}': {}", step.id, job.id, e)
                    })?;
                }

                if let Some(cache) = &step.cache {
                    if cache.key.trim().is_empty() {
                        anyhow::bail!(
                            "Step '{}' in job '{}' has a cache directive with an empty key",
                            step.id,
                            job.id
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Get the pipeline-level env as a string map
    pub fn env_as_string_map(&self) -> BTreeMap<String, String> {
        env_as_string_map(&self.env)
    }

    /// Total number of steps across all jobs
    pub fn step_count(&self) -> usize {
        self.jobs.iter().map(|j| j.steps.len()).sum()
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}
