//! GraphClient trait, the command interface consumers program against
//!
//! Failures are carried as statuses on the returned results, never as `Err`.

use crate::cancel::CancellationToken;
use crate::db::GraphDb;
use crate::query::{QueryBatchResult, QueryResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Command interface of a graph database.
///
/// Implemented by:
/// - `GraphDb`, the embedded database
/// - `Arc<C>` for any client, so one database can be shared across tasks
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Run `command` as one batch, stopping before the next statement once
    /// `cancel` is raised
    async fn execute_batch_with(&self, command: &str, cancel: &CancellationToken) -> QueryBatchResult;

    /// Run `command`; one result per statement, in source order
    async fn execute_batch(&self, command: &str) -> QueryBatchResult {
        self.execute_batch_with(command, &CancellationToken::new()).await
    }

    /// Run `command` and return the result of its last statement
    async fn execute(&self, command: &str) -> QueryResult {
        self.execute_batch(command).await.into_last()
    }
}

#[async_trait]
impl GraphClient for GraphDb {
    async fn execute_batch_with(&self, command: &str, cancel: &CancellationToken) -> QueryBatchResult {
        GraphDb::execute_batch_with(self, command, cancel).await
    }
}

#[async_trait]
impl<C: GraphClient + ?Sized> GraphClient for Arc<C> {
    async fn execute_batch_with(&self, command: &str, cancel: &CancellationToken) -> QueryBatchResult {
        self.as_ref().execute_batch_with(command, cancel).await
    }
}
