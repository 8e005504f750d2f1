//! Graph node
//!
//! A node is identified by its key. Its tags change only through an
//! explicit replace-with-same-key update.

use super::link::DataLink;
use super::tags::Tags;
use super::types::NodeKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node in the graph map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Globally unique, case-insensitive key
    pub key: NodeKey,

    pub tags: Tags,

    /// Set from the batch clock of the statement that created the node
    pub created_date: DateTime<Utc>,

    /// Data links by case-folded name
    pub links: BTreeMap<String, DataLink>,
}

impl GraphNode {
    pub fn new(key: impl Into<NodeKey>, tags: Tags, created_date: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            tags,
            created_date,
            links: BTreeMap::new(),
        }
    }

    /// Attach (or replace) a data link
    pub fn set_link(&mut self, link: DataLink) -> Option<DataLink> {
        self.links.insert(link.name.to_lowercase(), link)
    }

    pub fn link(&self, name: &str) -> Option<&DataLink> {
        self.links.get(&name.to_lowercase())
    }

    /// Copy of this node with `tags` merged over its current tags
    pub fn with_merged_tags(&self, tags: &Tags) -> GraphNode {
        let mut node = self.clone();
        node.tags = self.tags.merge(tags);
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_case_insensitive() {
        let mut node = GraphNode::new("node1", Tags::new(), Utc::now());
        node.set_link(DataLink::new("Contract", b"abc".to_vec()));
        assert_eq!(node.link("contract").unwrap().payload, b"abc");
        assert!(node.link("other").is_none());

        let replaced = node.set_link(DataLink::new("CONTRACT", b"xyz".to_vec()));
        assert!(replaced.is_some());
        assert_eq!(node.links.len(), 1);
    }

    #[test]
    fn test_with_merged_tags() {
        let node = GraphNode::new("node1", Tags::parse("a=1,b").unwrap(), Utc::now());
        let updated = node.with_merged_tags(&Tags::parse("a=2,c").unwrap());
        assert_eq!(updated.key, node.key);
        assert_eq!(updated.tags.value("a"), Some("2"));
        assert!(updated.tags.has("b"));
        assert!(updated.tags.has("c"));
        assert_eq!(updated.created_date, node.created_date);
    }
}
