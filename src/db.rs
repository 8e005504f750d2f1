//! Embedded graph database
//!
//! `GraphDb` ties the map, the journal and the store together: it recovers
//! state on open, runs command batches, and writes checkpoints.

use crate::cancel::CancellationToken;
use crate::config::{ConfigError, GraphConfig};
use crate::graph::GraphMap;
use crate::persistence::{
    checkpoint, recover, DataStore, Journal, PersistenceError, PersistenceResult, RecoveryReport,
};
use crate::query::{parse_batch, QueryBatchResult, QueryExecutor, QueryResult, StatusCode};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DbError {
    pub fn status(&self) -> StatusCode {
        match self {
            DbError::Persistence(e) if e.is_locked() => StatusCode::Locked,
            DbError::Persistence(PersistenceError::Graph(e)) => e.status(),
            DbError::Persistence(_) => StatusCode::Error,
            DbError::Config(_) => StatusCode::BadRequest,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// An open graph database
pub struct GraphDb {
    store: Arc<dyn DataStore>,
    config: GraphConfig,
    map: GraphMap,
    journal: Mutex<Journal>,
}

impl std::fmt::Debug for GraphDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDb")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GraphDb {
    /// Recover from `store` and open the journal for writing
    pub async fn open(store: Arc<dyn DataStore>, config: GraphConfig) -> DbResult<(Self, RecoveryReport)> {
        config.validate()?;
        let (state, report) = recover(store.as_ref(), &config).await?;
        let journal = Journal::open(store.clone(), &config.journal_options(), report.next_lsn())
            .await
            .map_err(PersistenceError::from)?;

        info!(
            "Graph database open: {} nodes, {} edges, next lsn {}",
            state.node_count(),
            state.edge_count(),
            report.next_lsn()
        );
        let db = Self {
            store,
            config,
            map: GraphMap::from_state(state),
            journal: Mutex::new(journal),
        };
        Ok((db, report))
    }

    pub fn map(&self) -> &GraphMap {
        &self.map
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// Run `command` and return the result of its last statement
    pub async fn execute(&self, command: &str) -> QueryResult {
        self.execute_batch(command).await.into_last()
    }

    pub async fn execute_batch(&self, command: &str) -> QueryBatchResult {
        self.execute_batch_with(command, &CancellationToken::new()).await
    }

    /// Run `command` as one batch, checking `cancel` before each statement
    pub async fn execute_batch_with(&self, command: &str, cancel: &CancellationToken) -> QueryBatchResult {
        let batch = match parse_batch(command) {
            Ok(batch) => batch,
            Err(e) => return QueryBatchResult::rejected(&e, self.map.last_lsn().await),
        };
        let executor = QueryExecutor::new(&self.map, self.config.executor_options());

        if batch.is_read_only() {
            return executor.execute_read_only(&batch, cancel).await;
        }

        let mut journal = self.journal.lock().await;
        let result = executor.execute(&batch, &mut journal, cancel).await;

        if let Some(interval) = self.config.checkpoint_interval {
            if journal.actions_since_checkpoint() >= interval {
                if let Err(e) = self.checkpoint_locked(&mut journal).await {
                    error!("Automatic checkpoint failed: {}", e);
                }
            }
        }
        result
    }

    /// Write a checkpoint of the current map and rotate the journal
    pub async fn checkpoint(&self) -> DbResult<usize> {
        let mut journal = self.journal.lock().await;
        Ok(self.checkpoint_locked(&mut journal).await?)
    }

    async fn checkpoint_locked(&self, journal: &mut Journal) -> PersistenceResult<usize> {
        // The checkpoint covers every record written so far, including the
        // Commit that follows the last Action, so sequence numbers stay
        // monotonic after the covered segments are deleted.
        let mut snapshot = self.map.snapshot().await;
        let covered = journal.next_lsn().saturating_sub(1).max(snapshot.last_lsn);
        snapshot.last_lsn = covered;

        info!("Checkpoint started at lsn {}", covered);
        let size = checkpoint::write(self.store.as_ref(), &self.config.checkpoint_options(), &snapshot).await?;

        // Holding the journal keeps mutations out, so the map is unchanged
        // since the snapshot.
        self.map.write().await.set_last_lsn(covered);
        journal.checkpointed(self.config.truncate_journal_on_checkpoint).await?;
        Ok(size)
    }

    /// Release the journal leases
    pub async fn close(self) -> DbResult<()> {
        let journal = self.journal.into_inner();
        journal.close().await.map_err(PersistenceError::from)?;
        info!("Graph database closed");
        Ok(())
    }
}
