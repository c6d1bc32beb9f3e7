//! Content-addressed cache for step artifacts
//!
//! Keys are derived from the job id, a fingerprint of the step's inputs and
//! a salt. Entries are write-once: a key's value never changes after the
//! first successful `put`, so invalidation means deriving a new key.

pub mod filesystem;
pub mod memory;

pub use filesystem::FileCacheStore;
pub use memory::MemoryCacheStore;

use crate::core::{CacheDirective, ExecutionContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Error types for cache operations
///
/// Callers treat every variant as recoverable: caching only buys speed.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read cache input '{path}': {source}")]
    Input {
        path: String,
        source: std::io::Error,
    },

    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Deterministic, hex-encoded cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

const KEY_DOMAIN: &[u8] = b"ci-pipeline/cache-key/v1";

fn update_field(hasher: &mut blake3::Hasher, field: &[u8]) {
    hasher.update(&(field.len() as u64).to_le_bytes());
    hasher.update(field);
}

impl CacheKey {
    /// Derive a key from its three inputs
    ///
    /// Fields are length-prefixed so distinct inputs cannot be shifted into
    /// the same byte stream.
    pub fn derive(job_id: &str, fingerprint: &str, salt: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(KEY_DOMAIN);
        update_field(&mut hasher, job_id.as_bytes());
        update_field(&mut hasher, fingerprint.as_bytes());
        update_field(&mut hasher, salt.as_bytes());
        CacheKey(hasher.finalize().to_hex().to_string())
    }

    /// Derive the key for a step's cache directive
    pub async fn for_directive(
        directive: &CacheDirective,
        context: &ExecutionContext,
    ) -> Result<Self, CacheError> {
        let fingerprint = fingerprint(directive, context).await?;
        Ok(Self::derive(&context.job_id, &fingerprint, &directive.salt))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for logs
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint of a directive's inputs: the rendered key template plus the
/// contents of every input file
///
/// A missing input file contributes a marker rather than an error, so the key
/// changes once the file appears.
pub async fn fingerprint(
    directive: &CacheDirective,
    context: &ExecutionContext,
) -> Result<String, CacheError> {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, context.render(&directive.key_template).as_bytes());

    for input in &directive.inputs {
        update_field(&mut hasher, input.as_bytes());
        match tokio::fs::read(context.resolve(input)).await {
            Ok(contents) => {
                hasher.update(b"F");
                update_field(&mut hasher, &contents);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                hasher.update(b"M");
            }
            Err(source) => {
                return Err(CacheError::Input {
                    path: input.clone(),
                    source,
                })
            }
        }
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// A stored blob with its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Vec<u8>,
    pub stored_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Key/value blob store shared by all concurrently running jobs
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a blob; `Ok(None)` is a miss
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store a blob; a key that already has a value keeps it
    async fn put(&self, key: &CacheKey, blob: Vec<u8>) -> Result<(), CacheError>;
}
