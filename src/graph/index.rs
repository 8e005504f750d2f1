//! Node and edge indices
//!
//! Nodes are indexed by key; edges by `(from, to, type)` with outgoing and
//! incoming adjacency sets keyed by node key. Adjacency sets are ordered so
//! traversal results are deterministic.

use super::edge::GraphEdge;
use super::node::GraphNode;
use super::types::{EdgeKey, NodeKey};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Node storage: key -> node
#[derive(Debug, Default, Clone)]
pub struct NodeIndex {
    nodes: FxHashMap<NodeKey, GraphNode>,
}

impl NodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &NodeKey) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Insert or replace, returning the previous node
    pub fn insert(&mut self, node: GraphNode) -> Option<GraphNode> {
        self.nodes.insert(node.key.clone(), node)
    }

    pub fn remove(&mut self, key: &NodeKey) -> Option<GraphNode> {
        self.nodes.remove(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }
}

/// Edge storage with adjacency sets
#[derive(Debug, Default, Clone)]
pub struct EdgeIndex {
    edges: FxHashMap<EdgeKey, GraphEdge>,
    outgoing: FxHashMap<NodeKey, BTreeSet<EdgeKey>>,
    incoming: FxHashMap<NodeKey, BTreeSet<EdgeKey>>,
}

impl EdgeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &EdgeKey) -> Option<&GraphEdge> {
        self.edges.get(key)
    }

    pub fn contains(&self, key: &EdgeKey) -> bool {
        self.edges.contains_key(key)
    }

    /// Insert or replace, returning the previous edge
    pub fn insert(&mut self, edge: GraphEdge) -> Option<GraphEdge> {
        let key = edge.key();
        self.outgoing
            .entry(key.from.clone())
            .or_default()
            .insert(key.clone());
        self.incoming
            .entry(key.to.clone())
            .or_default()
            .insert(key.clone());
        self.edges.insert(key, edge)
    }

    pub fn remove(&mut self, key: &EdgeKey) -> Option<GraphEdge> {
        let edge = self.edges.remove(key)?;
        Self::unlink(&mut self.outgoing, &key.from, key);
        Self::unlink(&mut self.incoming, &key.to, key);
        Some(edge)
    }

    fn unlink(adjacency: &mut FxHashMap<NodeKey, BTreeSet<EdgeKey>>, node: &NodeKey, key: &EdgeKey) {
        if let Some(set) = adjacency.get_mut(node) {
            set.remove(key);
            if set.is_empty() {
                adjacency.remove(node);
            }
        }
    }

    /// Edges leaving `node`
    pub fn outgoing(&self, node: &NodeKey) -> Vec<&GraphEdge> {
        self.collect(self.outgoing.get(node))
    }

    /// Edges arriving at `node`
    pub fn incoming(&self, node: &NodeKey) -> Vec<&GraphEdge> {
        self.collect(self.incoming.get(node))
    }

    /// Keys of every edge where `node` is from or to
    pub fn incident_keys(&self, node: &NodeKey) -> Vec<EdgeKey> {
        let mut keys: BTreeSet<EdgeKey> = BTreeSet::new();
        if let Some(set) = self.outgoing.get(node) {
            keys.extend(set.iter().cloned());
        }
        if let Some(set) = self.incoming.get(node) {
            keys.extend(set.iter().cloned());
        }
        keys.into_iter().collect()
    }

    fn collect(&self, keys: Option<&BTreeSet<EdgeKey>>) -> Vec<&GraphEdge> {
        keys.map(|set| set.iter().filter_map(|k| self.edges.get(k)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Tags;
    use chrono::Utc;

    fn edge(from: &str, to: &str, t: &str) -> GraphEdge {
        GraphEdge::new(from, to, t, Tags::new(), Utc::now())
    }

    #[test]
    fn test_adjacency() {
        let mut index = EdgeIndex::new();
        index.insert(edge("n1", "n2", "knows"));
        index.insert(edge("n1", "n3", "knows"));
        index.insert(edge("n2", "n3", "follows"));

        let n1 = NodeKey::new("n1");
        let n2 = NodeKey::new("n2");
        let n3 = NodeKey::new("n3");

        assert_eq!(index.outgoing(&n1).len(), 2);
        assert_eq!(index.incoming(&n1).len(), 0);
        assert_eq!(index.outgoing(&n2).len(), 1);
        assert_eq!(index.incoming(&n2).len(), 1);
        assert_eq!(index.incoming(&n3).len(), 2);
        assert_eq!(index.incident_keys(&n2).len(), 2);
    }

    #[test]
    fn test_remove_unlinks() {
        let mut index = EdgeIndex::new();
        index.insert(edge("n1", "n2", "knows"));
        let key = EdgeKey::new("N1", "N2", "KNOWS");

        assert!(index.remove(&key).is_some());
        assert!(index.remove(&key).is_none());
        assert!(index.outgoing(&NodeKey::new("n1")).is_empty());
        assert!(index.incoming(&NodeKey::new("n2")).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_self_loop_incident_once() {
        let mut index = EdgeIndex::new();
        index.insert(edge("n1", "n1", "self"));
        assert_eq!(index.incident_keys(&NodeKey::new("n1")).len(), 1);
    }

    #[test]
    fn test_node_index_replace() {
        let mut index = NodeIndex::new();
        let node = GraphNode::new("n1", Tags::new(), Utc::now());
        assert!(index.insert(node.clone()).is_none());
        assert!(index.insert(node).is_some());
        assert_eq!(index.len(), 1);
        assert!(index.contains(&NodeKey::new("N1")));
    }
}
