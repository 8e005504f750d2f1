//! Unique alternate-key indices
//!
//! A node declares unique alternate keys with the reserved tag
//! `uniqueIndex=email|username`. For every declared tag that carries a value
//! the maintainer keeps one index node `unique:<tag>:<value>` and one
//! `uniqueIndex` edge from that index node to the owner. Because the index
//! node key is globally unique, two owners can never hold the same value.
//! The `unique:` key space is closed to user mutations.
//!
//! All effects go through the ordinary `GraphState` primitives, so they are
//! journaled and replayed like any other change.

use crate::graph::{
    is_valid_key, AddMode, ChangeLog, EdgeKey, GraphEdge, GraphError, GraphNode, GraphResult, GraphState, NodeKey,
    Tag, Tags,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::debug;

/// Reserved tag declaring a node's unique alternate keys
pub const UNIQUE_INDEX_TAG: &str = "uniqueIndex";

/// Type of the edge from an index node to its owner
pub const UNIQUE_INDEX_EDGE_TYPE: &str = "uniqueIndex";

const INDEX_KEY_PREFIX: &str = "unique";

/// Trimmed, lower-cased form of an alternate-key value
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Map text into the key alphabet. Other bytes, and `$` itself, become
/// `$hh`, so distinct inputs keep distinct keys.
fn escape_key_part(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' | b'.' | b':' | b'@' | b'/' | b'#' | b'+' => {
                escaped.push(char::from(byte))
            }
            _ => {
                let _ = write!(escaped, "${:02x}", byte);
            }
        }
    }
    escaped
}

/// Key of the index node for `tag=value`
pub fn index_node_key(tag: &str, value: &str) -> NodeKey {
    NodeKey::new(format!(
        "{}:{}:{}",
        INDEX_KEY_PREFIX,
        escape_key_part(&tag.to_lowercase()),
        escape_key_part(&normalize(value))
    ))
}

/// True for keys in the index node key space, which only the maintainer
/// may create, change or delete
pub fn is_reserved_key(key: &NodeKey) -> bool {
    key.as_str()
        .get(..INDEX_KEY_PREFIX.len() + 1)
        .is_some_and(|head| head.eq_ignore_ascii_case(&format!("{}:", INDEX_KEY_PREFIX)))
}

/// Reject user mutations addressing an index node
pub fn check_user_key(key: &NodeKey) -> GraphResult<()> {
    if is_reserved_key(key) {
        return Err(GraphError::BadRequest(format!(
            "key {} is reserved for unique indices",
            key
        )));
    }
    Ok(())
}

/// Tag names listed by the reserved declaration tag
pub fn declared_tags(tags: &Tags) -> Vec<String> {
    tags.value(UNIQUE_INDEX_TAG)
        .map(|list| {
            list.split('|')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Edges may not declare unique indices
pub fn check_edge_tags(tags: &Tags) -> GraphResult<()> {
    if tags.has(UNIQUE_INDEX_TAG) {
        return Err(GraphError::BadRequest(format!(
            "the {} tag is only supported on nodes",
            UNIQUE_INDEX_TAG
        )));
    }
    Ok(())
}

#[derive(Debug)]
struct IndexEntry {
    tag: String,
    value: String,
}

/// Index node keys the node should own, by its current tags
fn desired_entries(node: &GraphNode) -> BTreeMap<NodeKey, IndexEntry> {
    let mut entries = BTreeMap::new();
    for tag in declared_tags(&node.tags) {
        let Some(value) = node.tags.value(&tag) else {
            continue;
        };
        if normalize(value).is_empty() {
            continue;
        }
        entries.insert(
            index_node_key(&tag, value),
            IndexEntry {
                tag: tag.clone(),
                value: normalize(value),
            },
        );
    }
    entries
}

/// Index nodes currently pointing at `owner`
fn current_index_keys(state: &GraphState, owner: &NodeKey) -> Vec<NodeKey> {
    state
        .incoming_edges(owner)
        .into_iter()
        .filter(|e| e.edge_type.as_str().eq_ignore_ascii_case(UNIQUE_INDEX_EDGE_TYPE))
        .map(|e| e.from.clone())
        .collect()
}

/// Owner an index node resolves to
fn owner_of<'a>(state: &'a GraphState, index_key: &NodeKey) -> Option<&'a NodeKey> {
    state
        .outgoing_edges(index_key)
        .into_iter()
        .find(|e| e.edge_type.as_str().eq_ignore_ascii_case(UNIQUE_INDEX_EDGE_TYPE))
        .map(|e| &e.to)
}

fn drop_index_edge(state: &mut GraphState, index_key: &NodeKey, owner: &NodeKey, log: &mut ChangeLog) -> GraphResult<()> {
    let edge_key = EdgeKey::new(index_key.clone(), owner.clone(), UNIQUE_INDEX_EDGE_TYPE);
    state.remove_edge(&edge_key, log)?;
    if state.has_node(index_key) && state.incident_edges(index_key).is_empty() {
        state.remove_node(index_key, log)?;
    }
    Ok(())
}

/// Bring the owner's index nodes in line with its tags.
///
/// Fails with `UniqueConflict` when a desired value is held by another node.
/// The caller undoes the statement's change log on failure.
pub fn reconcile(state: &mut GraphState, owner: &NodeKey, now: DateTime<Utc>, log: &mut ChangeLog) -> GraphResult<()> {
    let Some(node) = state.get_node(owner) else {
        return Err(GraphError::NodeNotFound(owner.clone()));
    };
    let desired = desired_entries(node);
    let current = current_index_keys(state, owner);

    for (index_key, entry) in &desired {
        if current.contains(index_key) {
            continue;
        }
        if !is_valid_key(index_key.as_str()) {
            return Err(GraphError::BadRequest(format!(
                "value of unique tag {} is too long to index",
                entry.tag
            )));
        }
        if let Some(holder) = owner_of(state, index_key) {
            if holder != owner {
                return Err(GraphError::UniqueConflict {
                    index: entry.tag.clone(),
                    value: entry.value.clone(),
                    owner: holder.clone(),
                });
            }
        }
    }

    for index_key in current.iter().filter(|k| !desired.contains_key(k)) {
        debug!("Releasing unique index {} from {}", index_key, owner);
        drop_index_edge(state, index_key, owner, log)?;
    }

    for (index_key, entry) in desired {
        if current.contains(&index_key) {
            continue;
        }
        let mut tags = Tags::new();
        tags.set(Tag::pair(UNIQUE_INDEX_TAG, entry.tag.as_str()));
        state.add_node(GraphNode::new(index_key.clone(), tags, now), AddMode::Strict, log)?;

        let edge = GraphEdge::new(index_key.clone(), owner.clone(), UNIQUE_INDEX_EDGE_TYPE, Tags::new(), now);
        state.add_edge(edge, AddMode::Strict, log)?;
        debug!("Indexed {} as {}", owner, index_key);
    }

    Ok(())
}

/// Remove every index node serving `owner`. Called before the owner is deleted.
pub fn release_owner(state: &mut GraphState, owner: &NodeKey, log: &mut ChangeLog) -> GraphResult<()> {
    for index_key in current_index_keys(state, owner) {
        drop_index_edge(state, &index_key, owner, log)?;
    }
    Ok(())
}

/// Resolve an alternate key to its owning node
pub fn lookup<'a>(state: &'a GraphState, tag: &str, value: &str) -> Option<&'a GraphNode> {
    let index_key = index_node_key(tag, value);
    owner_of(state, &index_key).and_then(|owner| state.get_node(owner))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_user(state: &mut GraphState, key: &str, tags: &str) -> GraphResult<ChangeLog> {
        let mut log = ChangeLog::new();
        let node = GraphNode::new(key, Tags::parse(tags).unwrap(), Utc::now());
        state.add_node(node, AddMode::Strict, &mut log)?;
        match reconcile(state, &NodeKey::new(key), Utc::now(), &mut log) {
            Ok(()) => Ok(log),
            Err(e) => {
                state.undo(&log);
                Err(e)
            }
        }
    }

    #[test]
    fn test_declared_tags() {
        let tags = Tags::parse("uniqueIndex=email|username, email=a@b.c").unwrap();
        assert_eq!(declared_tags(&tags), vec!["email".to_string(), "username".to_string()]);
        assert!(declared_tags(&Tags::parse("email=x").unwrap()).is_empty());
    }

    #[test]
    fn test_index_node_key_normalized() {
        assert_eq!(index_node_key("Email", "  Alice@Example.com "), NodeKey::new("unique:email:alice@example.com"));
    }

    #[test]
    fn test_index_node_key_escapes_outside_alphabet() {
        let key = index_node_key("name", "John Smith");
        assert_eq!(key, NodeKey::new("unique:name:john$20smith"));
        assert!(is_valid_key(key.as_str()));

        // a literal escape sequence stays distinct from the escaped value
        assert_eq!(index_node_key("name", "john$20smith"), NodeKey::new("unique:name:john$2420smith"));
    }

    #[test]
    fn test_reserved_keys() {
        assert!(is_reserved_key(&NodeKey::new("unique:email:a@x.com")));
        assert!(is_reserved_key(&NodeKey::new("UNIQUE:email:a@x.com")));
        assert!(!is_reserved_key(&NodeKey::new("uniqueness")));
        assert!(!is_reserved_key(&NodeKey::new("unique")));
        assert!(check_user_key(&NodeKey::new("unique:x:y")).is_err());
    }

    #[test]
    fn test_orphan_index_node_is_not_adopted() {
        let mut state = GraphState::new();
        let mut log = ChangeLog::new();
        let orphan = GraphNode::new("unique:email:a@x.com", Tags::parse("note=mine").unwrap(), Utc::now());
        state.add_node(orphan, AddMode::Strict, &mut log).unwrap();
        let before = state.snapshot();

        let result = add_user(&mut state, "user1", "uniqueIndex=email,email=a@x.com");
        assert!(matches!(result, Err(GraphError::NodeAlreadyExists(_))));
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_reconcile_creates_index() {
        let mut state = GraphState::new();
        add_user(&mut state, "user1", "uniqueIndex=email|username,email=Alice@x.com,username=alice").unwrap();

        assert_eq!(state.node_count(), 3);
        assert_eq!(state.edge_count(), 2);
        let found = lookup(&state, "email", "alice@X.com").unwrap();
        assert_eq!(found.key, NodeKey::new("user1"));
        let index = state.get_node(&NodeKey::new("unique:username:alice")).unwrap();
        assert_eq!(index.tags.value(UNIQUE_INDEX_TAG), Some("username"));
    }

    #[test]
    fn test_conflicting_owner_rejected() {
        let mut state = GraphState::new();
        add_user(&mut state, "user1", "uniqueIndex=email,email=a@x.com").unwrap();
        let before = state.snapshot();

        let result = add_user(&mut state, "user2", "uniqueIndex=email,email=A@X.COM");
        assert_eq!(
            result.unwrap_err(),
            GraphError::UniqueConflict {
                index: "email".to_string(),
                value: "a@x.com".to_string(),
                owner: NodeKey::new("user1"),
            }
        );
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_value_change_retargets_index() {
        let mut state = GraphState::new();
        add_user(&mut state, "user1", "uniqueIndex=email,email=old@x.com").unwrap();

        let mut log = ChangeLog::new();
        let owner = NodeKey::new("user1");
        state
            .update_node(&[owner.clone()], |n| n.with_merged_tags(&Tags::parse("email=new@x.com").unwrap()), &mut log)
            .unwrap();
        reconcile(&mut state, &owner, Utc::now(), &mut log).unwrap();

        assert!(lookup(&state, "email", "old@x.com").is_none());
        assert!(!state.has_node(&index_node_key("email", "old@x.com")));
        assert_eq!(lookup(&state, "email", "new@x.com").unwrap().key, owner);
        assert_eq!(state.node_count(), 2);
    }

    #[test]
    fn test_release_owner_removes_index_nodes() {
        let mut state = GraphState::new();
        add_user(&mut state, "user1", "uniqueIndex=email|username,email=a@x.com,username=a").unwrap();

        let owner = NodeKey::new("user1");
        let mut log = ChangeLog::new();
        release_owner(&mut state, &owner, &mut log).unwrap();
        state.remove_node(&owner, &mut log).unwrap();

        assert_eq!(state.node_count(), 0);
        assert_eq!(state.edge_count(), 0);

        // the value is free again
        add_user(&mut state, "user2", "uniqueIndex=email,email=a@x.com").unwrap();
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut state = GraphState::new();
        add_user(&mut state, "user1", "uniqueIndex=email,email=a@x.com").unwrap();

        let mut log = ChangeLog::new();
        reconcile(&mut state, &NodeKey::new("user1"), Utc::now(), &mut log).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_edge_declaration_rejected() {
        assert!(check_edge_tags(&Tags::parse("uniqueIndex=email").unwrap()).is_err());
        assert!(check_edge_tags(&Tags::parse("weight=1").unwrap()).is_ok());
    }
}
