//! Key types for the graph map
//!
//! Node keys and edge types compare case-insensitively but remember the
//! spelling they were first written with. An edge is identified by the
//! `(from, to, type)` triple.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

/// Edge type used when an `add edge` statement omits `type=`
pub const DEFAULT_EDGE_TYPE: &str = "default";

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_\-.:@/#$+]*$").expect("static key pattern")
});

/// Returns true if `value` is a well-formed node key or edge type
pub fn is_valid_key(value: &str) -> bool {
    value.len() <= 1024 && KEY_PATTERN.is_match(value)
}

/// String with case-insensitive identity
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
struct FoldedStr {
    raw: String,
    folded: String,
}

impl FoldedStr {
    fn new(raw: String) -> Self {
        let folded = raw.to_lowercase();
        Self { raw, folded }
    }
}

impl From<String> for FoldedStr {
    fn from(raw: String) -> Self {
        FoldedStr::new(raw)
    }
}

impl From<FoldedStr> for String {
    fn from(value: FoldedStr) -> Self {
        value.raw
    }
}

impl PartialEq for FoldedStr {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for FoldedStr {}

impl Hash for FoldedStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl PartialOrd for FoldedStr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FoldedStr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded.cmp(&other.folded)
    }
}

/// Globally unique node key
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(FoldedStr);

impl NodeKey {
    /// Create a key without validating its shape
    pub fn new(key: impl Into<String>) -> Self {
        NodeKey(FoldedStr::new(key.into()))
    }

    /// Create a key, rejecting malformed input
    pub fn parse(key: &str) -> Option<Self> {
        is_valid_key(key).then(|| NodeKey::new(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0.raw
    }

    /// Lower-cased form used for identity
    pub fn folded(&self) -> &str {
        &self.0.folded
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.raw)
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({})", self.0.raw)
    }
}

impl From<&str> for NodeKey {
    fn from(s: &str) -> Self {
        NodeKey::new(s)
    }
}

impl From<String> for NodeKey {
    fn from(s: String) -> Self {
        NodeKey::new(s)
    }
}

/// Edge type (e.g. "default", "owns", "uniqueIndex")
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeType(FoldedStr);

impl EdgeType {
    pub fn new(edge_type: impl Into<String>) -> Self {
        EdgeType(FoldedStr::new(edge_type.into()))
    }

    pub fn parse(edge_type: &str) -> Option<Self> {
        is_valid_key(edge_type).then(|| EdgeType::new(edge_type))
    }

    pub fn as_str(&self) -> &str {
        &self.0.raw
    }
}

impl Default for EdgeType {
    fn default() -> Self {
        EdgeType::new(DEFAULT_EDGE_TYPE)
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.raw)
    }
}

impl fmt::Debug for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdgeType({})", self.0.raw)
    }
}

impl From<&str> for EdgeType {
    fn from(s: &str) -> Self {
        EdgeType::new(s)
    }
}

/// Identity of an edge: the `(from, to, type)` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub from: NodeKey,
    pub to: NodeKey,
    pub edge_type: EdgeType,
}

impl EdgeKey {
    pub fn new(from: impl Into<NodeKey>, to: impl Into<NodeKey>, edge_type: impl Into<EdgeType>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            edge_type: edge_type.into(),
        }
    }

    /// True if `key` is either endpoint
    pub fn touches(&self, key: &NodeKey) -> bool {
        &self.from == key || &self.to == key
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-[{}]->{}", self.from, self.edge_type, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_key_case_insensitive() {
        let a = NodeKey::new("User:Alice");
        let b = NodeKey::new("user:alice");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "User:Alice");
        assert_eq!(a.folded(), "user:alice");

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_key_shape() {
        assert!(is_valid_key("node1"));
        assert!(is_valid_key("unique:email:alice@example.com"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("has space"));
        assert!(!is_valid_key("-leading"));
        assert!(NodeKey::parse("bad key").is_none());
    }

    #[test]
    fn test_edge_key_identity() {
        let a = EdgeKey::new("node1", "node2", "Default");
        let b = EdgeKey::new("NODE1", "node2", "default");
        assert_eq!(a, b);
        assert!(a.touches(&NodeKey::new("Node2")));
        assert!(!a.touches(&NodeKey::new("node3")));
        assert_eq!(a.to_string(), "node1-[Default]->node2");
    }

    #[test]
    fn test_key_serde_keeps_spelling() {
        let key = NodeKey::new("Node1");
        let bytes = bincode::serialize(&key).unwrap();
        let back: NodeKey = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.as_str(), "Node1");
        assert_eq!(back, NodeKey::new("node1"));
    }

    #[test]
    fn test_default_edge_type() {
        assert_eq!(EdgeType::default(), EdgeType::new("DEFAULT"));
    }
}
