//! Keygraph
//!
//! An embedded, key-addressed graph store. Nodes and edges carry tags and
//! are manipulated through a small command language; every applied mutation
//! is written to a write-ahead journal so the graph can be rebuilt exactly
//! from the last checkpoint after a crash or restart.
//!
//! # Layout
//!
//! - `graph`: nodes, edges, tags, the shared `GraphMap`
//! - `index`: unique alternate-key indices kept as ordinary nodes and edges
//! - `query`: command language parser and execution engine
//! - `persistence`: storage collaborator, journal, checkpoints, recovery
//! - `db` / `client`: the embedded database and its command interface
//!
//! ## Example Usage
//!
//! ```rust
//! use keygraph::{GraphConfig, GraphDb, MemoryStore, StatusCode};
//! use std::sync::Arc;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let (db, _report) = GraphDb::open(Arc::new(MemoryStore::new()), GraphConfig::default())
//!     .await
//!     .unwrap();
//!
//! let result = db
//!     .execute_batch("add node key=node1; add node key=node2; add edge from=node1, to=node2, type=default;")
//!     .await;
//! assert_eq!(result.status, StatusCode::Ok);
//!
//! let found = db.execute("select (key=node1) -> [type=default];").await;
//! assert_eq!(found.nodes.len(), 1);
//! assert_eq!(found.edges.len(), 1);
//! # });
//! # }
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod client;
pub mod config;
pub mod db;
pub mod graph;
pub mod index;
pub mod persistence;
pub mod query;

// Re-export main types for convenience
pub use graph::{
    AddMode, DataLink, EdgeKey, EdgeType, GraphEdge, GraphError, GraphMap, GraphNode, GraphResult,
    GraphSnapshot, GraphState, NodeKey, Tag, Tags,
};

pub use query::{
    parse_batch, AliasBinding, Batch, ExecutorOptions, LinkValue, ParseError, QueryBatchResult,
    QueryExecutor, QueryResult, Statement, StatusCode,
};

pub use persistence::{
    DataStore, FileStore, Journal, JournalEntry, LeaseId, MemoryStore, PersistenceError, PersistenceResult,
    RecoveryReport, StorageError, StorageResult,
};

pub use cancel::CancellationToken;
pub use client::GraphClient;
pub use config::{ConfigError, GraphConfig};
pub use db::{DbError, DbResult, GraphDb};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
        assert_eq!(ver, "0.1.0");
    }
}
