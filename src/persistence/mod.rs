//! Persistence layer
//!
//! - `storage`: the blob-store collaborator (`DataStore`) and its leases
//! - `journal`: write-ahead journal streams
//! - `checkpoint` / `recovery`: snapshots and journal replay

pub mod checkpoint;
pub mod file;
pub mod journal;
pub mod lease;
pub mod memory;
pub mod recovery;
pub mod storage;

pub use checkpoint::{CheckpointError, CheckpointOptions, CheckpointResult};
pub use file::FileStore;
pub use journal::{EntryKind, Journal, JournalEntry, JournalError, JournalOptions, JournalResult};
pub use lease::{acquire_with_backoff, BackoffPolicy, LeaseKind, LeaseTable};
pub use memory::MemoryStore;
pub use recovery::{rebuild, recover, replay, RecoveryReport};
pub use storage::{DataStore, LeaseId, StorageError, StorageResult};

use crate::graph::GraphError;
use thiserror::Error;

/// Umbrella error for durability operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Invalid journal: {0}")]
    InvalidJournal(String),
}

impl PersistenceError {
    /// True if the failure was lease contention that outlasted the wait
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            PersistenceError::Storage(StorageError::Locked(_))
                | PersistenceError::Journal(JournalError::Storage(StorageError::Locked(_)))
                | PersistenceError::Checkpoint(CheckpointError::Storage(StorageError::Locked(_)))
        )
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
