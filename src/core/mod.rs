//! Core domain models for the pipeline
//!
//! This module defines the fundamental data structures that represent
//! pipelines, jobs, steps, and the results of running them.

pub mod config;
pub mod pipeline;
pub mod job;
pub mod condition;
pub mod context;
pub mod state;

pub use pipeline::*;
pub use job::*;
pub use condition::{Predicate, PredicateError};
pub use context::*;
pub use state::*;
