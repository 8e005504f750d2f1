//! In-memory graph map
//!
//! `GraphState` holds the node and edge indices together with the last
//! applied log sequence number. Its mutation primitives are conflict-aware
//! and express every effect as an `EntityChange` recorded in a `ChangeLog`,
//! so the exact same effect can be redone from the journal or undone.
//!
//! `GraphMap` is the shared handle: one lock guards both indices so the
//! node-side and edge-side effects of a statement become visible together.

use super::change::{ChangeLog, EntityChange};
use super::edge::GraphEdge;
use super::index::{EdgeIndex, NodeIndex};
use super::node::GraphNode;
use super::tags::Tags;
use super::types::{EdgeKey, NodeKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Errors that can occur during graph operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeKey),

    #[error("Node {0} already exists")]
    NodeAlreadyExists(NodeKey),

    #[error("Edge {0} not found")]
    EdgeNotFound(EdgeKey),

    #[error("Edge {0} already exists")]
    EdgeAlreadyExists(EdgeKey),

    #[error("Invalid edge: {role} node {key} does not exist")]
    MissingEndpoint { role: &'static str, key: NodeKey },

    #[error("Unique index '{index}' value '{value}' is already owned by {owner}")]
    UniqueConflict {
        index: String,
        value: String,
        owner: NodeKey,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Conflict policy for add primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMode {
    /// Fail with a conflict if the entity exists (user-facing `add`)
    Strict,
    /// Merge tags into an existing entity (index maintenance)
    Upsert,
}

/// Canonical node/edge state
#[derive(Debug, Default, Clone)]
pub struct GraphState {
    nodes: NodeIndex,
    edges: EdgeIndex,
    last_lsn: u64,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- reads -----------------------------------------------------------

    pub fn get_node(&self, key: &NodeKey) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    pub fn has_node(&self, key: &NodeKey) -> bool {
        self.nodes.contains(key)
    }

    pub fn get_edge(&self, key: &EdgeKey) -> Option<&GraphEdge> {
        self.edges.get(key)
    }

    pub fn has_edge(&self, key: &EdgeKey) -> bool {
        self.edges.contains(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter()
    }

    pub fn outgoing_edges(&self, key: &NodeKey) -> Vec<&GraphEdge> {
        self.edges.outgoing(key)
    }

    pub fn incoming_edges(&self, key: &NodeKey) -> Vec<&GraphEdge> {
        self.edges.incoming(key)
    }

    /// Every edge where `key` is from or to, ordered by edge key
    pub fn incident_edges(&self, key: &NodeKey) -> Vec<&GraphEdge> {
        self.edges
            .incident_keys(key)
            .iter()
            .filter_map(|k| self.edges.get(k))
            .collect()
    }

    /// Nodes carrying every tag in `filter`, ordered by key
    pub fn find_nodes(&self, filter: &Tags) -> Vec<&GraphNode> {
        let mut found: Vec<&GraphNode> = self.nodes.iter().filter(|n| n.tags.matches(filter)).collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Highest log sequence number applied to this state
    pub fn last_lsn(&self) -> u64 {
        self.last_lsn
    }

    pub fn set_last_lsn(&mut self, lsn: u64) {
        self.last_lsn = lsn;
    }

    // ---- raw redo / undo -------------------------------------------------

    /// Install the after-image of `change`. This is the only place the
    /// indices are written, so live execution and journal replay share it.
    pub fn apply_change(&mut self, change: &EntityChange) {
        match change {
            EntityChange::Node { key, after, .. } => match after {
                Some(node) => {
                    self.nodes.insert(node.clone());
                }
                None => {
                    self.nodes.remove(key);
                }
            },
            EntityChange::Edge { key, after, .. } => match after {
                Some(edge) => {
                    self.edges.insert(edge.clone());
                }
                None => {
                    self.edges.remove(key);
                }
            },
        }
    }

    /// Restore every before-image recorded in `log`
    pub fn undo(&mut self, log: &ChangeLog) {
        for change in log.undo_changes() {
            self.apply_change(&change);
        }
    }

    fn record(&mut self, change: EntityChange, log: &mut ChangeLog) {
        self.apply_change(&change);
        log.push(change);
    }

    // ---- node primitives -------------------------------------------------

    /// Add a node. `Strict` fails if the key exists; `Upsert` merges the new
    /// tags (and data links) into the existing node.
    pub fn add_node(&mut self, node: GraphNode, mode: AddMode, log: &mut ChangeLog) -> GraphResult<()> {
        match (self.nodes.get(&node.key), mode) {
            (None, _) => {
                self.record(EntityChange::node(node.key.clone(), None, Some(node)), log);
                Ok(())
            }
            (Some(existing), AddMode::Strict) => Err(GraphError::NodeAlreadyExists(existing.key.clone())),
            (Some(existing), AddMode::Upsert) => {
                let before = existing.clone();
                let mut after = existing.with_merged_tags(&node.tags);
                for link in node.links.into_values() {
                    after.set_link(link);
                }
                if after != before {
                    self.record(EntityChange::node(before.key.clone(), Some(before), Some(after)), log);
                }
                Ok(())
            }
        }
    }

    /// Remove a node. Incident edges are removed first through the removal
    /// hook so the journal carries them ahead of the node itself.
    pub fn remove_node(&mut self, key: &NodeKey, log: &mut ChangeLog) -> GraphResult<GraphNode> {
        let node = self
            .nodes
            .get(key)
            .cloned()
            .ok_or_else(|| GraphError::NodeNotFound(key.clone()))?;

        self.on_node_removed(key, log);
        self.record(EntityChange::node(node.key.clone(), Some(node.clone()), None), log);
        Ok(node)
    }

    fn on_node_removed(&mut self, key: &NodeKey, log: &mut ChangeLog) {
        for edge_key in self.edges.incident_keys(key) {
            if let Some(edge) = self.edges.get(&edge_key).cloned() {
                self.record(EntityChange::edge(edge_key, Some(edge), None), log);
            }
        }
    }

    /// Replace each target with `transform(target)`. All targets must exist;
    /// nothing is changed if one is missing. The transform must keep the key.
    pub fn update_node<F>(&mut self, targets: &[NodeKey], transform: F, log: &mut ChangeLog) -> GraphResult<()>
    where
        F: Fn(&GraphNode) -> GraphNode,
    {
        if let Some(missing) = targets.iter().find(|k| !self.nodes.contains(k)) {
            return Err(GraphError::NodeNotFound(missing.clone()));
        }

        for key in targets {
            let Some(before) = self.nodes.get(key).cloned() else {
                continue;
            };
            let after = transform(&before);
            assert_eq!(before.key, after.key, "node update changed the primary key");
            if after != before {
                self.record(EntityChange::node(key.clone(), Some(before), Some(after)), log);
            }
        }
        Ok(())
    }

    // ---- edge primitives -------------------------------------------------

    /// Add an edge. Both endpoints must exist.
    pub fn add_edge(&mut self, edge: GraphEdge, mode: AddMode, log: &mut ChangeLog) -> GraphResult<()> {
        if !self.nodes.contains(&edge.from) {
            return Err(GraphError::MissingEndpoint {
                role: "from",
                key: edge.from.clone(),
            });
        }
        if !self.nodes.contains(&edge.to) {
            return Err(GraphError::MissingEndpoint {
                role: "to",
                key: edge.to.clone(),
            });
        }

        let key = edge.key();
        match (self.edges.get(&key), mode) {
            (None, _) => {
                self.record(EntityChange::edge(key, None, Some(edge)), log);
                Ok(())
            }
            (Some(_), AddMode::Strict) => Err(GraphError::EdgeAlreadyExists(key)),
            (Some(existing), AddMode::Upsert) => {
                let before = existing.clone();
                let after = existing.with_merged_tags(&edge.tags);
                if after != before {
                    self.record(EntityChange::edge(key, Some(before), Some(after)), log);
                }
                Ok(())
            }
        }
    }

    pub fn remove_edge(&mut self, key: &EdgeKey, log: &mut ChangeLog) -> GraphResult<GraphEdge> {
        let edge = self
            .edges
            .get(key)
            .cloned()
            .ok_or_else(|| GraphError::EdgeNotFound(key.clone()))?;
        self.record(EntityChange::edge(key.clone(), Some(edge.clone()), None), log);
        Ok(edge)
    }

    pub fn update_edge<F>(&mut self, targets: &[EdgeKey], transform: F, log: &mut ChangeLog) -> GraphResult<()>
    where
        F: Fn(&GraphEdge) -> GraphEdge,
    {
        if let Some(missing) = targets.iter().find(|k| !self.edges.contains(k)) {
            return Err(GraphError::EdgeNotFound(missing.clone()));
        }

        for key in targets {
            let Some(before) = self.edges.get(key).cloned() else {
                continue;
            };
            let after = transform(&before);
            assert_eq!(before.key(), after.key(), "edge update changed the primary key");
            if after != before {
                self.record(EntityChange::edge(key.clone(), Some(before), Some(after)), log);
            }
        }
        Ok(())
    }

    // ---- snapshots -------------------------------------------------------

    /// Ordered copy of the full state
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<GraphNode> = self.nodes.iter().cloned().collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        let mut edges: Vec<GraphEdge> = self.edges.iter().cloned().collect();
        edges.sort_by_key(|e| e.key());
        GraphSnapshot {
            last_lsn: self.last_lsn,
            nodes,
            edges,
        }
    }

    /// Rebuild state from a snapshot
    pub fn from_snapshot(snapshot: GraphSnapshot) -> GraphResult<Self> {
        let mut state = GraphState::new();
        for node in snapshot.nodes {
            let key = node.key.clone();
            if state.nodes.insert(node).is_some() {
                return Err(GraphError::NodeAlreadyExists(key));
            }
        }
        for edge in snapshot.edges {
            let key = edge.key();
            if !state.nodes.contains(&key.from) || !state.nodes.contains(&key.to) {
                return Err(GraphError::BadRequest(format!("snapshot edge {} has a missing endpoint", key)));
            }
            if state.edges.insert(edge).is_some() {
                return Err(GraphError::EdgeAlreadyExists(key));
            }
        }
        state.last_lsn = snapshot.last_lsn;
        Ok(state)
    }
}

/// Full, ordered copy of a map: nodes by key, edges by identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub last_lsn: u64,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Shared handle to a graph state
#[derive(Debug, Default)]
pub struct GraphMap {
    state: RwLock<GraphState>,
}

impl GraphMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: GraphState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Shared read access for queries
    pub async fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read().await
    }

    /// Exclusive access for the execution engine and recovery
    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, GraphState> {
        self.state.write().await
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn last_lsn(&self) -> u64 {
        self.state.read().await.last_lsn()
    }

    pub async fn node_count(&self) -> usize {
        self.state.read().await.node_count()
    }

    pub async fn edge_count(&self) -> usize {
        self.state.read().await.edge_count()
    }

    pub async fn get_node(&self, key: &NodeKey) -> Option<GraphNode> {
        self.state.read().await.get_node(key).cloned()
    }

    pub async fn get_edge(&self, key: &EdgeKey) -> Option<GraphEdge> {
        self.state.read().await.get_edge(key).cloned()
    }

    /// Resolve a unique alternate key (`email`, `alice@example.com`) to its owner
    pub async fn lookup_unique(&self, tag: &str, value: &str) -> Option<GraphNode> {
        let state = self.state.read().await;
        crate::index::unique::lookup(&state, tag, value).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(key: &str, tags: &str) -> GraphNode {
        GraphNode::new(key, Tags::parse(tags).unwrap(), Utc::now())
    }

    fn edge(from: &str, to: &str) -> GraphEdge {
        GraphEdge::new(from, to, "default", Tags::new(), Utc::now())
    }

    fn state_with(keys: &[&str]) -> GraphState {
        let mut state = GraphState::new();
        let mut log = ChangeLog::new();
        for key in keys {
            state.add_node(node(key, ""), AddMode::Strict, &mut log).unwrap();
        }
        state
    }

    #[test]
    fn test_add_node_strict_conflict() {
        let mut state = state_with(&["node1"]);
        let mut log = ChangeLog::new();

        let result = state.add_node(node("NODE1", "t1"), AddMode::Strict, &mut log);
        assert_eq!(result, Err(GraphError::NodeAlreadyExists(NodeKey::new("node1"))));
        assert!(log.is_empty());
        assert!(state.get_node(&NodeKey::new("node1")).unwrap().tags.is_empty());
    }

    #[test]
    fn test_add_node_upsert_merges() {
        let mut state = GraphState::new();
        let mut log = ChangeLog::new();
        state.add_node(node("n1", "a=1,b"), AddMode::Strict, &mut log).unwrap();
        state.add_node(node("n1", "a=2,c"), AddMode::Upsert, &mut log).unwrap();

        let merged = state.get_node(&NodeKey::new("n1")).unwrap();
        assert_eq!(merged.tags.value("a"), Some("2"));
        assert!(merged.tags.has("b"));
        assert!(merged.tags.has("c"));
        assert_eq!(log.len(), 2);

        // upsert with nothing new records no change
        state.add_node(node("n1", "c"), AddMode::Upsert, &mut log).unwrap();
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_remove_node_cascades_edges() {
        let mut state = state_with(&["n1", "n2", "n3"]);
        let mut log = ChangeLog::new();
        state.add_edge(edge("n1", "n2"), AddMode::Strict, &mut log).unwrap();
        state.add_edge(edge("n3", "n1"), AddMode::Strict, &mut log).unwrap();
        state.add_edge(edge("n2", "n3"), AddMode::Strict, &mut log).unwrap();

        let mut log = ChangeLog::new();
        state.remove_node(&NodeKey::new("n1"), &mut log).unwrap();

        assert_eq!(state.node_count(), 2);
        assert_eq!(state.edge_count(), 1);
        assert_eq!(log.len(), 3);
        assert_eq!(log.iter().last().unwrap().kind(), "delete-node");
    }

    #[test]
    fn test_remove_missing_node() {
        let mut state = GraphState::new();
        let mut log = ChangeLog::new();
        let result = state.remove_node(&NodeKey::new("ghost"), &mut log);
        assert_eq!(result, Err(GraphError::NodeNotFound(NodeKey::new("ghost"))));
    }

    #[test]
    fn test_update_node_requires_all_targets() {
        let mut state = state_with(&["n1"]);
        let mut log = ChangeLog::new();
        let targets = [NodeKey::new("n1"), NodeKey::new("n2")];
        let result = state.update_node(&targets, |n| n.with_merged_tags(&Tags::parse("x").unwrap()), &mut log);

        assert_eq!(result, Err(GraphError::NodeNotFound(NodeKey::new("n2"))));
        assert!(log.is_empty());
        assert!(!state.get_node(&NodeKey::new("n1")).unwrap().tags.has("x"));
    }

    #[test]
    #[should_panic(expected = "primary key")]
    fn test_update_node_key_change_is_fatal() {
        let mut state = state_with(&["n1"]);
        let mut log = ChangeLog::new();
        let _ = state.update_node(
            &[NodeKey::new("n1")],
            |n| {
                let mut changed = n.clone();
                changed.key = NodeKey::new("other");
                changed
            },
            &mut log,
        );
    }

    #[test]
    fn test_add_edge_requires_endpoints() {
        let mut state = state_with(&["n1"]);
        let mut log = ChangeLog::new();
        let result = state.add_edge(edge("n1", "n2"), AddMode::Strict, &mut log);
        assert_eq!(
            result,
            Err(GraphError::MissingEndpoint {
                role: "to",
                key: NodeKey::new("n2")
            })
        );
    }

    #[test]
    fn test_add_edge_conflict() {
        let mut state = state_with(&["n1", "n2"]);
        let mut log = ChangeLog::new();
        state.add_edge(edge("n1", "n2"), AddMode::Strict, &mut log).unwrap();
        let result = state.add_edge(edge("N1", "N2"), AddMode::Strict, &mut log);
        assert!(matches!(result, Err(GraphError::EdgeAlreadyExists(_))));
        assert_eq!(state.edge_count(), 1);
    }

    #[test]
    fn test_undo_restores_state() {
        let mut state = state_with(&["n1", "n2"]);
        let mut log = ChangeLog::new();
        state.add_edge(edge("n1", "n2"), AddMode::Strict, &mut log).unwrap();
        let before = state.snapshot();

        let mut log = ChangeLog::new();
        state.remove_node(&NodeKey::new("n1"), &mut log).unwrap();
        assert_eq!(state.edge_count(), 0);

        state.undo(&log);
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_replaying_changes_reproduces_state() {
        let mut live = GraphState::new();
        let mut log = ChangeLog::new();
        for key in ["a", "b", "c"] {
            live.add_node(node(key, ""), AddMode::Strict, &mut log).unwrap();
        }
        live.add_edge(edge("a", "b"), AddMode::Strict, &mut log).unwrap();
        live.add_edge(edge("b", "c"), AddMode::Strict, &mut log).unwrap();
        live.update_node(&[NodeKey::new("b")], |n| n.with_merged_tags(&Tags::parse("x=1").unwrap()), &mut log)
            .unwrap();
        live.remove_node(&NodeKey::new("c"), &mut log).unwrap();

        let mut replica = GraphState::new();
        for change in log.iter() {
            replica.apply_change(change);
        }
        assert_eq!(replica.snapshot(), live.snapshot());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut state = state_with(&["n1", "n2"]);
        let mut log = ChangeLog::new();
        state.add_edge(edge("n1", "n2"), AddMode::Strict, &mut log).unwrap();
        state.set_last_lsn(42);

        let snapshot = state.snapshot();
        let restored = GraphState::from_snapshot(snapshot.clone()).unwrap();
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.last_lsn(), 42);
    }

    #[tokio::test]
    async fn test_graph_map_reads() {
        let map = GraphMap::from_state(state_with(&["n1"]));
        assert_eq!(map.node_count().await, 1);
        assert!(map.get_node(&NodeKey::new("N1")).await.is_some());
        assert_eq!(map.last_lsn().await, 0);
    }
}
