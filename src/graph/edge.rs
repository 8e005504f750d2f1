//! Graph edge
//!
//! Edges are directed and identified by `(from, to, type)`; endpoints are
//! node keys resolved at read time, never references.

use super::tags::Tags;
use super::types::{EdgeKey, EdgeType, NodeKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A directed edge in the graph map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Edge goes FROM this node
    pub from: NodeKey,

    /// Edge goes TO this node
    pub to: NodeKey,

    pub edge_type: EdgeType,

    pub tags: Tags,

    pub created_date: DateTime<Utc>,
}

impl GraphEdge {
    pub fn new(
        from: impl Into<NodeKey>,
        to: impl Into<NodeKey>,
        edge_type: impl Into<EdgeType>,
        tags: Tags,
        created_date: DateTime<Utc>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            edge_type: edge_type.into(),
            tags,
            created_date,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.from.clone(), self.to.clone(), self.edge_type.clone())
    }

    /// The endpoint opposite `node`, if `node` is an endpoint
    pub fn other_end(&self, node: &NodeKey) -> Option<&NodeKey> {
        if &self.from == node {
            Some(&self.to)
        } else if &self.to == node {
            Some(&self.from)
        } else {
            None
        }
    }

    pub fn with_merged_tags(&self, tags: &Tags) -> GraphEdge {
        let mut edge = self.clone();
        edge.tags = self.tags.merge(tags);
        edge
    }
}
