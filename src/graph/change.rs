//! Entity changes and the per-statement change log
//!
//! Every mutation of the graph map is expressed as an `EntityChange`
//! carrying the before- and after-image of one node or edge. Applying the
//! after-images in order redoes a statement; applying the before-images in
//! reverse order undoes it.

use super::edge::GraphEdge;
use super::node::GraphNode;
use super::types::{EdgeKey, NodeKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Before/after image of a single entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityChange {
    Node {
        key: NodeKey,
        before: Option<GraphNode>,
        after: Option<GraphNode>,
    },
    Edge {
        key: EdgeKey,
        before: Option<GraphEdge>,
        after: Option<GraphEdge>,
    },
}

impl EntityChange {
    pub fn node(key: NodeKey, before: Option<GraphNode>, after: Option<GraphNode>) -> Self {
        EntityChange::Node { key, before, after }
    }

    pub fn edge(key: EdgeKey, before: Option<GraphEdge>, after: Option<GraphEdge>) -> Self {
        EntityChange::Edge { key, before, after }
    }

    /// The change that restores the before-image
    pub fn inverse(&self) -> EntityChange {
        match self {
            EntityChange::Node { key, before, after } => EntityChange::Node {
                key: key.clone(),
                before: after.clone(),
                after: before.clone(),
            },
            EntityChange::Edge { key, before, after } => EntityChange::Edge {
                key: key.clone(),
                before: after.clone(),
                after: before.clone(),
            },
        }
    }

    /// Short verb describing the change, e.g. "add-node"
    pub fn kind(&self) -> &'static str {
        let (before, after, node) = match self {
            EntityChange::Node { before, after, .. } => (before.is_some(), after.is_some(), true),
            EntityChange::Edge { before, after, .. } => (before.is_some(), after.is_some(), false),
        };
        match (before, after, node) {
            (false, true, true) => "add-node",
            (true, true, true) => "update-node",
            (true, false, true) => "delete-node",
            (false, true, false) => "add-edge",
            (true, true, false) => "update-edge",
            (true, false, false) => "delete-edge",
            (false, false, _) => "noop",
        }
    }
}

impl fmt::Display for EntityChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityChange::Node { key, .. } => write!(f, "{} {}", self.kind(), key),
            EntityChange::Edge { key, .. } => write!(f, "{} {}", self.kind(), key),
        }
    }
}

/// Changes applied by one statement, in application order
#[derive(Debug, Default)]
pub struct ChangeLog {
    changes: Vec<EntityChange>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: EntityChange) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityChange> {
        self.changes.iter()
    }

    pub fn into_changes(self) -> Vec<EntityChange> {
        self.changes
    }

    /// Inverse changes in reverse order. Undo is only ever requested for a
    /// log that recorded something.
    pub fn undo_changes(&self) -> Vec<EntityChange> {
        assert!(!self.changes.is_empty(), "undo requested on an empty change log");
        self.changes.iter().rev().map(EntityChange::inverse).collect()
    }
}
