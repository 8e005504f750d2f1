//! Mutation statement handlers
//!
//! Each handler runs against the locked state and records its effects in
//! the statement's change log. On error the caller undoes whatever was
//! recorded, so a handler may fail part way through.

use crate::graph::{
    is_valid_key, AddMode, ChangeLog, EdgeKey, GraphEdge, GraphError, GraphNode, GraphResult, GraphState, NodeKey,
};
use crate::index::unique;
use crate::query::ast::{AddEdge, AddNode, Statement, UpdateEdge, UpdateNode};
use chrono::{DateTime, Utc};

/// Apply one mutating statement
pub fn apply(state: &mut GraphState, statement: &Statement, now: DateTime<Utc>, log: &mut ChangeLog) -> GraphResult<()> {
    match statement {
        Statement::AddNode(add) => add_node(state, add, now, log),
        Statement::AddEdge(add) => add_edge(state, add, now, log),
        Statement::UpdateNode(update) => update_node(state, update, now, log),
        Statement::UpdateEdge(update) => update_edge(state, update, log),
        Statement::DeleteNode { key, if_exists } => delete_node(state, key, *if_exists, log),
        Statement::DeleteEdge { key, if_exists } => delete_edge(state, key, *if_exists, log),
        Statement::Select(_) => Err(GraphError::BadRequest("select is not a mutation".to_string())),
    }
}

fn check_key(key: &NodeKey) -> GraphResult<()> {
    if is_valid_key(key.as_str()) {
        Ok(())
    } else {
        Err(GraphError::InvalidKey(key.as_str().to_string()))
    }
}

/// Index edges belong to the unique index maintainer
fn check_edge_endpoints(from: &NodeKey, to: &NodeKey) -> GraphResult<()> {
    unique::check_user_key(from)?;
    unique::check_user_key(to)
}

fn add_node(state: &mut GraphState, add: &AddNode, now: DateTime<Utc>, log: &mut ChangeLog) -> GraphResult<()> {
    check_key(&add.key)?;
    unique::check_user_key(&add.key)?;

    let mut node = GraphNode::new(add.key.clone(), add.tags.clone(), now);
    for link in &add.links {
        node.set_link(link.clone());
    }
    state.add_node(node, AddMode::Strict, log)?;
    unique::reconcile(state, &add.key, now, log)
}

fn add_edge(state: &mut GraphState, add: &AddEdge, now: DateTime<Utc>, log: &mut ChangeLog) -> GraphResult<()> {
    check_key(&add.from)?;
    check_key(&add.to)?;
    check_edge_endpoints(&add.from, &add.to)?;
    unique::check_edge_tags(&add.tags)?;

    let edge = GraphEdge::new(add.from.clone(), add.to.clone(), add.edge_type.clone(), add.tags.clone(), now);
    state.add_edge(edge, AddMode::Strict, log)
}

fn update_node(state: &mut GraphState, update: &UpdateNode, now: DateTime<Utc>, log: &mut ChangeLog) -> GraphResult<()> {
    unique::check_user_key(&update.key)?;
    let targets = [update.key.clone()];
    state.update_node(
        &targets,
        |node| {
            let mut updated = node.with_merged_tags(&update.tags);
            for name in &update.removed {
                updated.tags.remove(name);
            }
            updated
        },
        log,
    )?;
    unique::reconcile(state, &update.key, now, log)
}

fn update_edge(state: &mut GraphState, update: &UpdateEdge, log: &mut ChangeLog) -> GraphResult<()> {
    check_edge_endpoints(&update.key.from, &update.key.to)?;
    unique::check_edge_tags(&update.tags)?;

    let targets = [update.key.clone()];
    state.update_edge(
        &targets,
        |edge| {
            let mut updated = edge.with_merged_tags(&update.tags);
            for name in &update.removed {
                updated.tags.remove(name);
            }
            updated
        },
        log,
    )
}

fn delete_node(state: &mut GraphState, key: &NodeKey, if_exists: bool, log: &mut ChangeLog) -> GraphResult<()> {
    unique::check_user_key(key)?;
    if !state.has_node(key) {
        return if if_exists {
            Ok(())
        } else {
            Err(GraphError::NodeNotFound(key.clone()))
        };
    }
    unique::release_owner(state, key, log)?;
    state.remove_node(key, log).map(|_| ())
}

fn delete_edge(state: &mut GraphState, key: &EdgeKey, if_exists: bool, log: &mut ChangeLog) -> GraphResult<()> {
    check_edge_endpoints(&key.from, &key.to)?;
    if !state.has_edge(key) {
        return if if_exists {
            Ok(())
        } else {
            Err(GraphError::EdgeNotFound(key.clone()))
        };
    }
    state.remove_edge(key, log).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_batch;

    /// Run every statement, undoing failed ones like the engine does
    fn run(state: &mut GraphState, input: &str) -> Vec<GraphResult<usize>> {
        let batch = parse_batch(input).unwrap();
        batch
            .statements
            .iter()
            .map(|statement| {
                let mut log = ChangeLog::new();
                match apply(state, statement, Utc::now(), &mut log) {
                    Ok(()) => Ok(log.len()),
                    Err(e) => {
                        if !log.is_empty() {
                            state.undo(&log);
                        }
                        Err(e)
                    }
                }
            })
            .collect()
    }

    #[test]
    fn test_add_then_conflict_keeps_tags() {
        let mut state = GraphState::new();
        let results = run(&mut state, "add node key=node1, t1; add node key=node1 set t2");
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(GraphError::NodeAlreadyExists(NodeKey::new("node1"))));

        let node = state.get_node(&NodeKey::new("node1")).unwrap();
        assert!(node.tags.has("t1"));
        assert!(!node.tags.has("t2"));
    }

    #[test]
    fn test_set_merges_and_removes() {
        let mut state = GraphState::new();
        run(&mut state, "add node key=n1, a=1, b, c");
        let results = run(&mut state, "set node key=n1, a=2, d, -c");
        assert_eq!(results[0], Ok(1));

        let tags = &state.get_node(&NodeKey::new("n1")).unwrap().tags;
        assert_eq!(tags.value("a"), Some("2"));
        assert!(tags.has("b"));
        assert!(tags.has("d"));
        assert!(!tags.has("c"));
    }

    #[test]
    fn test_set_missing_is_not_found() {
        let mut state = GraphState::new();
        let results = run(&mut state, "set node key=ghost, t1; set edge from=a, to=b, t1");
        assert_eq!(results[0], Err(GraphError::NodeNotFound(NodeKey::new("ghost"))));
        assert_eq!(results[1], Err(GraphError::EdgeNotFound(EdgeKey::new("a", "b", "default"))));
    }

    #[test]
    fn test_delete_if_exists_is_noop() {
        let mut state = GraphState::new();
        let results = run(&mut state, "delete node ifexist key=n1; delete node ifexist key=n1; delete node key=n1");
        assert_eq!(results[0], Ok(0));
        assert_eq!(results[1], Ok(0));
        assert_eq!(results[2], Err(GraphError::NodeNotFound(NodeKey::new("n1"))));
    }

    #[test]
    fn test_delete_node_cascades() {
        let mut state = GraphState::new();
        run(
            &mut state,
            "add node key=a; add node key=b; add node key=c; add edge from=a, to=b; add edge from=c, to=a, type=knows",
        );
        assert_eq!(state.edge_count(), 2);

        let results = run(&mut state, "delete node key=a");
        assert_eq!(results[0], Ok(3));
        assert_eq!(state.edge_count(), 0);
        assert_eq!(state.node_count(), 2);
    }

    #[test]
    fn test_add_edge_requires_endpoints() {
        let mut state = GraphState::new();
        run(&mut state, "add node key=a");
        let results = run(&mut state, "add edge from=a, to=b");
        assert_eq!(
            results[0],
            Err(GraphError::MissingEndpoint {
                role: "to",
                key: NodeKey::new("b")
            })
        );
        assert_eq!(state.edge_count(), 0);
    }

    #[test]
    fn test_unique_conflict_rolls_back_add() {
        let mut state = GraphState::new();
        run(&mut state, "add node key=u1, uniqueIndex=email, email=a@x.com");
        let before = state.snapshot();

        let results = run(&mut state, "add node key=u2, uniqueIndex=email, email=a@x.com");
        assert!(matches!(results[0], Err(GraphError::UniqueConflict { .. })));
        assert_eq!(state.snapshot(), before);
        assert!(!state.has_node(&NodeKey::new("u2")));
    }

    #[test]
    fn test_delete_owner_releases_index() {
        let mut state = GraphState::new();
        run(&mut state, "add node key=u1, uniqueIndex=email, email=a@x.com");
        assert_eq!(state.node_count(), 2);

        run(&mut state, "delete node key=u1");
        assert_eq!(state.node_count(), 0);
        assert_eq!(state.edge_count(), 0);
    }

    #[test]
    fn test_index_keys_reserved_for_maintainer() {
        let mut state = GraphState::new();
        run(&mut state, "add node key=u1, uniqueIndex=email, email=a@x.com");
        let before = state.snapshot();

        let results = run(
            &mut state,
            "add node key=unique:email:b@x.com; \
             set node key=unique:email:a@x.com, note=mine; \
             delete node key=unique:email:a@x.com; \
             delete edge from=unique:email:a@x.com, to=u1, type=uniqueIndex; \
             add edge from=unique:email:a@x.com, to=u1, type=other",
        );
        assert!(results.iter().all(|r| matches!(r, Err(GraphError::BadRequest(_)))));
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_edge_unique_tag_rejected() {
        let mut state = GraphState::new();
        run(&mut state, "add node key=a; add node key=b");
        let results = run(&mut state, "add edge from=a, to=b, uniqueIndex=email");
        assert!(matches!(results[0], Err(GraphError::BadRequest(_))));
    }
}
