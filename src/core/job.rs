//! Job and step domain models

use crate::core::{
    condition::Predicate,
    config::{CacheConfig, JobConfig, StepConfig},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Target platform a job runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Macos,
    Windows,
}

impl Platform {
    /// The platform this binary was compiled for
    pub fn host() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Macos
        } else {
            Platform::Linux
        }
    }

    /// Parse a platform name or a runner label such as `ubuntu-latest`
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if name == "linux" || name.starts_with("ubuntu") {
            Some(Platform::Linux)
        } else if name == "macos" || name == "darwin" || name.starts_with("macos-") {
            Some(Platform::Macos)
        } else if name.starts_with("windows") {
            Some(Platform::Windows)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Windows => "windows",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache directive attached to a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirective {
    /// Key template rendered against the execution context
    pub key_template: String,

    /// Files (relative to the job's working directory) whose contents feed the fingerprint
    pub inputs: Vec<String>,

    /// Rotate to invalidate existing entries
    pub salt: String,

    /// Artifact file stored and restored; the step output is cached when absent
    pub path: Option<String>,

    /// A hit satisfies the step without running its command
    pub restore_only: bool,
}

impl CacheDirective {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            key_template: config.key.clone(),
            inputs: config.inputs.clone(),
            salt: config.salt.clone(),
            path: config.path.clone(),
            restore_only: config.restore_only,
        }
    }
}

/// A single command-level unit of work
#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,

    /// Display name, defaults to the id
    pub name: String,

    /// Shell command to run
    pub command: String,

    /// Activation predicate
    pub condition: Predicate,

    pub cache: Option<CacheDirective>,

    /// Overrides the job timeout for this step
    pub timeout: Option<Duration>,
}

impl Step {
    /// Create a step from a step config
    ///
    /// Predicates are validated by `PipelineConfig::validate`, so a parse
    /// failure here falls back to `Predicate::Always`.
    pub fn from_config(config: &StepConfig) -> Self {
        let condition = config
            .run_if
            .as_deref()
            .and_then(|expr| Predicate::parse(expr).ok())
            .unwrap_or(Predicate::Always);

        Step {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            command: config.run.clone(),
            condition,
            cache: config.cache.as_ref().map(CacheDirective::from_config),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    /// Create an unconditional step with no cache directive
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        Step {
            name: id.clone(),
            id,
            command: command.into(),
            condition: Predicate::Always,
            cache: None,
            timeout: None,
        }
    }

    pub fn with_condition(mut self, condition: Predicate) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_cache(mut self, cache: CacheDirective) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An independently schedulable sequence of steps
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,

    /// Display name, defaults to the id
    pub name: String,

    pub platform: Platform,

    /// Environment overrides; these win over the pipeline environment
    pub env: BTreeMap<String, String>,

    /// Working directory relative to the workspace root
    pub working_dir: Option<String>,

    /// Time allowance for each step of the job
    pub timeout: Option<Duration>,

    /// Steps in declared order
    pub steps: Vec<Step>,
}

impl Job {
    /// Create a job from a job config
    pub fn from_config(config: &JobConfig) -> Self {
        Job {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            platform: Platform::parse(&config.platform).unwrap_or_else(Platform::host),
            env: config.env_as_string_map(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
            steps: config.steps.iter().map(Step::from_config).collect(),
        }
    }

    /// Create a job with no overrides
    pub fn new(id: impl Into<String>, platform: Platform, steps: Vec<Step>) -> Self {
        let id = id.into();
        Job {
            name: id.clone(),
            id,
            platform,
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
            steps,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}
