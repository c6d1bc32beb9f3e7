//! Step activation predicates

use crate::core::{context::ExecutionContext, job::Platform};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Error parsing a predicate expression
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PredicateError {
    #[error("Invalid predicate '{0}': expected `platform == <os>`, `env.NAME != <value>`, `always` or `never`")]
    Syntax(String),

    #[error("Unknown platform '{0}' in predicate")]
    UnknownPlatform(String),
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
}

impl Comparison {
    fn apply<T: PartialEq + ?Sized>(&self, left: &T, right: &T) -> bool {
        match self {
            Comparison::Equal => left == right,
            Comparison::NotEqual => left != right,
        }
    }
}

/// Condition deciding whether a step runs, evaluated against the job's context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Always,
    Never,
    Platform { op: Comparison, platform: Platform },
    Env { name: String, op: Comparison, value: String },
}

fn predicate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*(platform|env\.([A-Za-z_][A-Za-z0-9_]*))\s*(==|!=)\s*(?:'([^']*)'|"([^"]*)"|(\S+))\s*$"#)
            .expect("predicate regex is valid")
    })
}

impl Predicate {
    /// Parse an expression such as `platform == linux` or `env.CI != 'false'`
    pub fn parse(expr: &str) -> Result<Self, PredicateError> {
        match expr.trim() {
            "" | "always" | "true" => return Ok(Predicate::Always),
            "never" | "false" => return Ok(Predicate::Never),
            _ => {}
        }

        let caps = predicate_regex()
            .captures(expr)
            .ok_or_else(|| PredicateError::Syntax(expr.to_string()))?;

        let op = match &caps[3] {
            "==" => Comparison::Equal,
            _ => Comparison::NotEqual,
        };
        let value = caps
            .get(4)
            .or_else(|| caps.get(5))
            .or_else(|| caps.get(6))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        match caps.get(2) {
            Some(name) => Ok(Predicate::Env {
                name: name.as_str().to_string(),
                op,
                value,
            }),
            None => {
                let platform =
                    Platform::parse(&value).ok_or(PredicateError::UnknownPlatform(value))?;
                Ok(Predicate::Platform { op, platform })
            }
        }
    }

    /// Evaluate against a job's execution context
    pub fn evaluate(&self, context: &ExecutionContext) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Never => false,
            Predicate::Platform { op, platform } => op.apply(&context.platform, platform),
            Predicate::Env { name, op, value } => {
                let actual = context.env.get(name).map(String::as_str).unwrap_or("");
                op.apply(actual, value.as_str())
            }
        }
    }

    /// Human-readable reason recorded when a step is skipped
    pub fn describe(&self) -> String {
        let op = |op: &Comparison| match op {
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
        };
        match self {
            Predicate::Always => "always".to_string(),
            Predicate::Never => "never".to_string(),
            Predicate::Platform { op: o, platform } => format!("platform {} {}", op(o), platform),
            Predicate::Env { name, op: o, value } => format!("env.{} {} '{}'", name, op(o), value),
        }
    }
}
