//! Filesystem cache store - one file per key

use crate::cache::{CacheEntry, CacheError, CacheKey, CacheStore};
use chrono::{DateTime, Utc};
use std::fs::{FileTimes, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Cache store keeping each blob in its own file under a root directory
///
/// Blobs are written to a temporary file beside their final location and
/// linked into place without clobbering. Readers only ever see complete
/// blobs, and a write that never finishes leaves nothing behind.
///
/// Bookkeeping lives in file metadata: the modification time is when the
/// blob was stored and the access time is set on every `get`.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    root: PathBuf,
}

impl FileCacheStore {
    /// Create a store rooted at `root`; directories are created lazily
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a store in the user's cache directory
    pub fn with_default_path() -> Self {
        Self::new(Self::default_dir())
    }

    /// `<cache dir>/ci-pipeline`
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ci-pipeline")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a key's blob, fanned out by the first two hex digits
    pub fn blob_path(&self, key: &CacheKey) -> PathBuf {
        let key = key.as_str();
        let shard = &key[..key.len().min(2)];
        self.root.join(shard).join(key)
    }

    /// Get an entry with its bookkeeping, without touching the access time
    pub async fn entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.blob_path(key);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io(e)),
        };
        let value = tokio::fs::read(&path).await?;
        let stored_at: DateTime<Utc> = metadata.modified()?.into();
        let last_accessed = metadata
            .accessed()
            .map(DateTime::<Utc>::from)
            .unwrap_or(stored_at);

        Ok(Some(CacheEntry {
            value,
            stored_at,
            last_accessed,
        }))
    }
}

/// Record a read in the blob's access time
fn touch_accessed(path: &Path, at: SystemTime) -> std::io::Result<()> {
    // Windows needs write access to change file times
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_times(FileTimes::new().set_accessed(at))
}

fn write_once(path: &Path, blob: &[u8]) -> Result<(), CacheError> {
    if path.exists() {
        return Ok(());
    }

    let dir = path
        .parent()
        .ok_or_else(|| CacheError::Backend(format!("invalid blob path {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(blob)?;
    staged.as_file().sync_all()?;

    match staged.persist_noclobber(path) {
        Ok(_) => Ok(()),
        // Another writer got there first; its blob is equivalent
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(CacheError::Io(e.error)),
    }
}

#[async_trait::async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.blob_path(key);
        match tokio::fs::read(&path).await {
            Ok(blob) => {
                debug!("Cache blob {} read from {}", key.short(), path.display());
                let touched = path.clone();
                match tokio::task::spawn_blocking(move || touch_accessed(&touched, SystemTime::now())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("Could not update access time of {}: {}", path.display(), e),
                    Err(e) => debug!("Access time update for {} failed: {}", path.display(), e),
                }
                Ok(Some(blob))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    async fn put(&self, key: &CacheKey, blob: Vec<u8>) -> Result<(), CacheError> {
        let path = self.blob_path(key);
        tokio::task::spawn_blocking(move || write_once(&path, &blob))
            .await
            .map_err(|e| CacheError::Backend(format!("cache writer task failed: {}", e)))?
    }
}
