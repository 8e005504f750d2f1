//! Command execution engine
//!
//! Runs a parsed batch statement by statement. Each statement either applies
//! completely (and is journaled) or leaves the map untouched; a failure is
//! recorded on that statement's result and execution moves on. A storage
//! failure while journaling aborts the rest of the batch.

pub mod mutation;
pub mod select;

use crate::cancel::CancellationToken;
use crate::graph::{ChangeLog, GraphMap};
use crate::persistence::Journal;
use crate::query::ast::{Batch, Statement};
use crate::query::result::{QueryBatchResult, QueryResult, StatusCode};
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default bound on the joins in one select
pub const DEFAULT_MAX_JOIN_DEPTH: usize = 8;

const CANCELLED: &str = "cancelled";

/// Executor settings
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    pub max_join_depth: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_join_depth: DEFAULT_MAX_JOIN_DEPTH,
        }
    }
}

/// Executes batches against a shared map
pub struct QueryExecutor<'a> {
    map: &'a GraphMap,
    options: ExecutorOptions,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(map: &'a GraphMap, options: ExecutorOptions) -> Self {
        Self { map, options }
    }

    async fn select(&self, statement: &Statement) -> QueryResult {
        let Statement::Select(select) = statement else {
            return QueryResult::failed(StatusCode::BadRequest, "not a select statement");
        };
        let state = self.map.read().await;
        select::run(&state, select, self.options.max_join_depth).unwrap_or_else(|e| QueryResult::from_error(&e))
    }

    /// Run a batch with no mutations. Only takes the map read lock.
    pub async fn execute_read_only(&self, batch: &Batch, cancel: &CancellationToken) -> QueryBatchResult {
        let mut items = Vec::with_capacity(batch.len());
        for statement in &batch.statements {
            if cancel.is_cancelled() {
                items.push(QueryResult::failed(StatusCode::Error, CANCELLED));
            } else if statement.is_read_only() {
                items.push(self.select(statement).await);
            } else {
                items.push(QueryResult::failed(StatusCode::BadRequest, "mutation in a read-only batch"));
            }
        }
        QueryBatchResult::from_items(items, None, self.map.last_lsn().await)
    }

    /// Run a batch, journaling every applied mutation.
    ///
    /// The caller holds the journal exclusively for the whole batch, so the
    /// batch's Start/Action/Commit records are contiguous.
    pub async fn execute(&self, batch: &Batch, journal: &mut Journal, cancel: &CancellationToken) -> QueryBatchResult {
        let transaction_id = Uuid::new_v4();
        let now = Utc::now();
        let first_lsn = journal.next_lsn();

        let mut items = Vec::with_capacity(batch.len());
        let mut started = false;
        let mut applied = 0usize;
        let mut aborted: Option<String> = None;
        let mut revoked_from = None;

        for (index, statement) in batch.statements.iter().enumerate() {
            if let Some(reason) = &aborted {
                items.push(QueryResult::failed(StatusCode::Error, reason.clone()));
                continue;
            }
            if cancel.is_cancelled() {
                items.push(QueryResult::failed(StatusCode::Error, CANCELLED));
                continue;
            }
            if statement.is_read_only() {
                items.push(self.select(statement).await);
                continue;
            }

            let mut state = self.map.write().await;
            let mut log = ChangeLog::new();

            if let Err(e) = mutation::apply(&mut state, statement, now, &mut log) {
                if !log.is_empty() {
                    state.undo(&log);
                }
                debug!("Statement {} ({}) failed: {}", index, statement.kind(), e);
                items.push(QueryResult::from_error(&e));
                continue;
            }
            if log.is_empty() {
                items.push(QueryResult::ok());
                continue;
            }

            if !started {
                if let Err(e) = journal.start(transaction_id).await {
                    state.undo(&log);
                    error!("Journal start failed for transaction {}: {}", transaction_id, e);
                    let reason = format!("journal write failed: {}", e);
                    items.push(QueryResult::failed(StatusCode::Error, reason.clone()));
                    aborted = Some(reason);
                    continue;
                }
                started = true;
            }

            let first_action = journal.next_lsn();
            match journal.append_actions(transaction_id, log.iter()).await {
                Ok(lsn) => {
                    state.set_last_lsn(lsn);
                    applied += 1;
                    items.push(QueryResult::ok());
                }
                Err(e) => {
                    state.undo(&log);
                    error!("Journal append failed for transaction {}: {}", transaction_id, e);
                    let reason = format!("journal write failed: {}", e);
                    items.push(QueryResult::failed(StatusCode::Error, reason.clone()));
                    aborted = Some(reason);
                    revoked_from = Some(first_action);
                }
            }
        }

        let mut batch_error = None;
        if started {
            if aborted.is_some() {
                if let Err(e) = journal.rollback(transaction_id, revoked_from).await {
                    warn!("Could not write rollback for transaction {}: {}", transaction_id, e);
                }
            } else if let Err(e) = journal.commit(transaction_id).await {
                error!("Journal commit failed for transaction {}: {}", transaction_id, e);
                batch_error = Some(format!("journal commit failed: {}", e));
            }
        }

        let last_lsn = self.map.last_lsn().await;
        if applied > 0 {
            info!(
                "Transaction {} applied {} of {} statements (lsn {}..={})",
                transaction_id,
                applied,
                batch.len(),
                first_lsn,
                last_lsn
            );
        }

        let mut result = QueryBatchResult::from_items(items, started.then_some(transaction_id), last_lsn);
        if let Some(message) = batch_error {
            result.status = StatusCode::Error;
            result.error = Some(message);
        }
        result
    }
}
