//! Trigger evaluation - decides whether a repository event starts a run

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

/// Error types for trigger evaluation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("Malformed trigger: {0}")]
    MalformedTrigger(String),
}

/// Kind of repository event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

impl EventKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "push" => Some(EventKind::Push),
            "pull_request" | "pull-request" => Some(EventKind::PullRequest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incoming repository event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: EventKind,

    /// Target branch, without any `refs/heads/` prefix
    pub branch: String,
}

impl TriggerEvent {
    /// Create an event, normalising the branch name
    pub fn new(kind: EventKind, branch: &str) -> Result<Self, TriggerError> {
        let branch = branch.trim();
        let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
        if branch.is_empty() {
            return Err(TriggerError::MalformedTrigger(
                "branch name is empty".to_string(),
            ));
        }
        Ok(Self {
            kind,
            branch: branch.to_string(),
        })
    }

    /// Parse an event record such as `{"kind": "push", "branch": "main"}`
    pub fn from_json(payload: &str) -> Result<Self, TriggerError> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| TriggerError::MalformedTrigger(format!("invalid JSON: {}", e)))?;

        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| TriggerError::MalformedTrigger("missing string field 'kind'".to_string()))?;
        let kind = EventKind::parse(kind).ok_or_else(|| {
            TriggerError::MalformedTrigger(format!("unknown event kind '{}'", kind))
        })?;

        let branch = value
            .get("branch")
            .and_then(|b| b.as_str())
            .ok_or_else(|| {
                TriggerError::MalformedTrigger("missing string field 'branch'".to_string())
            })?;

        Self::new(kind, branch)
    }
}

/// Admission policy: configured event kinds and an exact-match branch set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPolicy {
    kinds: BTreeSet<EventKind>,
    branches: BTreeSet<String>,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self::new([EventKind::Push, EventKind::PullRequest], ["main".to_string()])
    }
}

impl TriggerPolicy {
    pub fn new(
        kinds: impl IntoIterator<Item = EventKind>,
        branches: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            branches: branches.into_iter().collect(),
        }
    }

    /// Whether an event should start a run
    pub fn admits(&self, event: &TriggerEvent) -> bool {
        let admitted = self.kinds.contains(&event.kind) && self.branches.contains(&event.branch);
        if admitted {
            info!("Admitting {} event on branch '{}'", event.kind, event.branch);
        } else {
            debug!("Ignoring {} event on branch '{}'", event.kind, event.branch);
        }
        admitted
    }

    /// Parse a raw event payload and decide admission
    pub fn evaluate(&self, payload: &str) -> Result<bool, TriggerError> {
        let event = TriggerEvent::from_json(payload)?;
        Ok(self.admits(&event))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &EventKind> {
        self.kinds.iter()
    }

    pub fn branches(&self) -> impl Iterator<Item = &String> {
        self.branches.iter()
    }
}
