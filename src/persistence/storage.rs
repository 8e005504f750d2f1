//! Storage collaborator
//!
//! A byte-oriented blob store addressed by `/`-separated relative paths.
//! Journals and checkpoints are written through this trait, so the graph
//! can live on local disk, in memory, or behind any blob-like service.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another holder owns the lease
    #[error("Lease conflict on {0}")]
    Conflict(String),

    /// Lease could not be obtained in time, or the path is leased by someone else
    #[error("Path {0} is locked")]
    Locked(String),

    /// Path escapes the store or is empty
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Identifier handed out with a lease
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(Uuid);

impl LeaseId {
    pub fn new() -> Self {
        LeaseId(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blob store with optimistic leases
///
/// Writes to a path that carries an active lease must present that lease,
/// otherwise they fail with `Locked`. Lease acquisition never waits: a held
/// lease yields `Conflict` and the caller decides whether to retry.
#[async_trait]
pub trait DataStore: Send + Sync + fmt::Debug {
    /// Read a blob; `None` if it does not exist
    async fn get(&self, path: &str) -> StorageResult<Option<Bytes>>;

    /// Create or replace a blob
    async fn set(&self, path: &str, data: Bytes, lease: Option<&LeaseId>) -> StorageResult<()>;

    /// Append to a blob, creating it if needed
    async fn append(&self, path: &str, data: Bytes, lease: Option<&LeaseId>) -> StorageResult<()>;

    /// Delete a blob; returns false if it did not exist
    async fn delete(&self, path: &str, lease: Option<&LeaseId>) -> StorageResult<bool>;

    /// Paths starting with `prefix`, sorted
    async fn search(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Take a lease that expires after `duration`
    async fn acquire_lease(&self, path: &str, duration: Duration) -> StorageResult<LeaseId>;

    /// Take a lease that lasts until released or broken
    async fn acquire_exclusive_lease(&self, path: &str) -> StorageResult<LeaseId>;

    /// Drop any lease on `path`, whoever holds it
    async fn break_lease(&self, path: &str) -> StorageResult<()>;

    async fn release(&self, path: &str, lease: &LeaseId) -> StorageResult<()>;
}

/// Normalize a store path: no empty, `.` or `..` segments, no leading `/`
pub fn normalize_path(path: &str) -> StorageResult<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == ".." || s.contains('\\')) {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}

/// Join path segments with `/`
pub fn join_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base, name.trim_start_matches('/'))
    }
}
