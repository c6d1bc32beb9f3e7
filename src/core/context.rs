//! Execution context - the resolved environment a job's steps run under

use crate::core::job::{Job, Platform, Step};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Resolved environment for one job
///
/// Built once per job by merging layers of environment maps and owned by
/// that job's runner; never shared between jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Job this context belongs to
    pub job_id: String,

    /// Environment variables passed to every step
    pub env: BTreeMap<String, String>,

    /// Directory commands run in
    pub working_dir: PathBuf,

    /// Platform predicates are evaluated against
    pub platform: Platform,

    /// Time allowance per step; `None` means no limit
    pub timeout: Option<Duration>,
}

/// Merge environment layers; later keys win
pub fn merge_env(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = base.clone();
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("placeholder regex is valid")
    })
}

impl ExecutionContext {
    /// Build the context for a job
    pub fn for_job(job: &Job, base_env: &BTreeMap<String, String>, workspace: &Path) -> Self {
        let working_dir = match &job.working_dir {
            Some(dir) => workspace.join(dir),
            None => workspace.to_path_buf(),
        };

        Self {
            job_id: job.id.clone(),
            env: merge_env(base_env, &job.env),
            working_dir,
            platform: job.platform,
            timeout: job.timeout,
        }
    }

    /// Context view for a single step, applying its timeout override
    pub fn for_step(&self, step: &Step) -> Self {
        let mut context = self.clone();
        if step.timeout.is_some() {
            context.timeout = step.timeout;
        }
        context
    }

    /// Get a variable
    pub fn get_variable(&self, key: &str) -> Option<&String> {
        self.env.get(key)
    }

    /// Resolve a path relative to the working directory
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.working_dir.join(relative)
    }

    /// Render `{{ job }}`, `{{ platform }}` and `{{ env.NAME }}` placeholders
    ///
    /// Unknown placeholders render as the empty string.
    pub fn render(&self, template: &str) -> String {
        placeholder_regex()
            .replace_all(template, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match name {
                    "job" => self.job_id.clone(),
                    "platform" => self.platform.to_string(),
                    _ => name
                        .strip_prefix("env.")
                        .and_then(|var| self.env.get(var))
                        .cloned()
                        .unwrap_or_default(),
                }
            })
            .into_owned()
    }
}
