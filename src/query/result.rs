//! Statement and batch results

use crate::graph::{EdgeKey, GraphEdge, GraphError, GraphNode, NodeKey};
use crate::query::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User-visible outcome of a statement or batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusCode {
    Ok,
    BadRequest,
    Conflict,
    NotFound,
    Locked,
    Error,
}

impl StatusCode {
    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "BadRequest",
            StatusCode::Conflict => "Conflict",
            StatusCode::NotFound => "NotFound",
            StatusCode::Locked => "Locked",
            StatusCode::Error => "Error",
        };
        write!(f, "{}", name)
    }
}

impl From<&GraphError> for StatusCode {
    fn from(err: &GraphError) -> Self {
        match err {
            GraphError::NodeNotFound(_) | GraphError::EdgeNotFound(_) | GraphError::MissingEndpoint { .. } => {
                StatusCode::NotFound
            }
            GraphError::NodeAlreadyExists(_) | GraphError::EdgeAlreadyExists(_) | GraphError::UniqueConflict { .. } => {
                StatusCode::Conflict
            }
            GraphError::InvalidKey(_) | GraphError::BadRequest(_) => StatusCode::BadRequest,
        }
    }
}

impl GraphError {
    /// Status reported for a statement that failed with this error
    pub fn status(&self) -> StatusCode {
        StatusCode::from(self)
    }
}

/// Entities bound to a select alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "keys")]
pub enum AliasBinding {
    Nodes(Vec<NodeKey>),
    Edges(Vec<EdgeKey>),
}

/// A projected data link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkValue {
    pub node: NodeKey,
    pub name: String,
    /// Base64 payload
    pub data: String,
}

/// Result of one statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub status: StatusCode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub nodes: Vec<GraphNode>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub edges: Vec<GraphEdge>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub aliases: Vec<(String, AliasBinding)>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub links: Vec<LinkValue>,
}

impl QueryResult {
    pub fn ok() -> Self {
        Self::with_status(StatusCode::Ok, None)
    }

    pub fn failed(status: StatusCode, message: impl Into<String>) -> Self {
        Self::with_status(status, Some(message.into()))
    }

    pub fn from_error(err: &GraphError) -> Self {
        Self::failed(err.status(), err.to_string())
    }

    fn with_status(status: StatusCode, error: Option<String>) -> Self {
        Self {
            status,
            error,
            nodes: Vec::new(),
            edges: Vec::new(),
            aliases: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Entities bound to `alias`
    pub fn alias(&self, alias: &str) -> Option<&AliasBinding> {
        self.aliases
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(alias))
            .map(|(_, binding)| binding)
    }

    pub fn link(&self, node: &NodeKey, name: &str) -> Option<&LinkValue> {
        self.links
            .iter()
            .find(|l| &l.node == node && l.name.eq_ignore_ascii_case(name))
    }
}

/// Result of a batch: one item per statement, in source order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBatchResult {
    /// Ok only if every item is Ok
    pub status: StatusCode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub items: Vec<QueryResult>,

    /// Set when the batch wrote to the journal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,

    /// Map sequence number after the batch
    pub last_lsn: u64,
}

impl QueryBatchResult {
    /// Build from items; status is derived from them
    pub fn from_items(items: Vec<QueryResult>, transaction_id: Option<Uuid>, last_lsn: u64) -> Self {
        let failed = items.iter().filter(|i| !i.is_ok()).count();
        let (status, error) = if failed == 0 {
            (StatusCode::Ok, None)
        } else {
            (StatusCode::Error, Some(format!("{} of {} statements failed", failed, items.len())))
        };
        Self {
            status,
            error,
            items,
            transaction_id,
            last_lsn,
        }
    }

    /// Rejected before execution; no items, nothing journaled
    pub fn rejected(err: &ParseError, last_lsn: u64) -> Self {
        Self {
            status: StatusCode::BadRequest,
            error: Some(err.to_string()),
            items: Vec::new(),
            transaction_id: None,
            last_lsn,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Result of the last statement, or a status-only result for an
    /// empty or rejected batch
    pub fn into_last(self) -> QueryResult {
        let status = self.status;
        let error = self.error;
        self.items
            .into_iter()
            .last()
            .unwrap_or_else(|| QueryResult::with_status(status, error))
    }
}
