//! Select evaluation
//!
//! A select is evaluated as a set of paths. The first step seeds the paths,
//! every join extends them, and the result holds the distinct nodes and
//! edges found on the paths that matched every step.
//!
//! After an edge, a path stands on the node the edge led to (`to` for a
//! seeding edge). A node step directly after a node step traverses any
//! single edge, and that edge is part of the result.

use crate::graph::{EdgeKey, GraphEdge, GraphError, GraphResult, GraphState, NodeKey};
use crate::query::ast::{EdgeFilter, JoinDirection, NodeFilter, Select, StepFilter};
use crate::query::result::{AliasBinding, LinkValue, QueryResult};
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Hop {
    Node(NodeKey),
    Edge { key: EdgeKey, arrived: NodeKey },
}

#[derive(Debug, Clone)]
struct PathHop {
    /// Step that bound this hop; `None` for an implicit node-to-node edge
    step: Option<usize>,
    hop: Hop,
}

type Path = Vec<PathHop>;

/// Evaluate a select against the locked state
pub fn run(state: &GraphState, select: &Select, max_join_depth: usize) -> GraphResult<QueryResult> {
    if select.joins.len() > max_join_depth {
        return Err(GraphError::BadRequest(format!(
            "join chain of {} exceeds the limit of {}",
            select.joins.len(),
            max_join_depth
        )));
    }
    if let Some(alias) = select.duplicate_alias() {
        return Err(GraphError::BadRequest(format!("duplicate alias '{}'", alias)));
    }

    let mut paths = seed(state, &select.start.filter);
    for (index, (direction, step)) in select.joins.iter().enumerate() {
        if paths.is_empty() {
            break;
        }
        paths = paths
            .into_iter()
            .flat_map(|path| extend(state, path, *direction, &step.filter, index + 1))
            .collect();
    }

    Ok(collect(state, select, &paths))
}

fn node_matches(state: &GraphState, key: &NodeKey, filter: &NodeFilter) -> bool {
    if filter.key.as_ref().is_some_and(|wanted| wanted != key) {
        return false;
    }
    state.get_node(key).is_some_and(|node| node.tags.matches(&filter.tags))
}

fn edge_matches(edge: &GraphEdge, filter: &EdgeFilter) -> bool {
    filter.from.as_ref().map_or(true, |k| k == &edge.from)
        && filter.to.as_ref().map_or(true, |k| k == &edge.to)
        && filter.edge_type.as_ref().map_or(true, |t| t == &edge.edge_type)
        && edge.tags.matches(&filter.tags)
}

fn seed(state: &GraphState, filter: &StepFilter) -> Vec<Path> {
    match filter {
        StepFilter::Node(filter) => {
            let keys: Vec<NodeKey> = match &filter.key {
                Some(key) => vec![key.clone()],
                None => state.find_nodes(&filter.tags).into_iter().map(|n| n.key.clone()).collect(),
            };
            keys.into_iter()
                .filter(|key| node_matches(state, key, filter))
                .map(|key| {
                    vec![PathHop {
                        step: Some(0),
                        hop: Hop::Node(key),
                    }]
                })
                .collect()
        }
        StepFilter::Edge(filter) => {
            let mut candidates: Vec<&GraphEdge> = match (&filter.from, &filter.to) {
                (Some(from), _) => state.outgoing_edges(from),
                (None, Some(to)) => state.incoming_edges(to),
                (None, None) => state.edges().collect(),
            };
            candidates.retain(|e| edge_matches(e, filter));
            candidates.sort_by_key(|e| e.key());
            candidates
                .into_iter()
                .map(|edge| {
                    vec![PathHop {
                        step: Some(0),
                        hop: Hop::Edge {
                            key: edge.key(),
                            arrived: edge.to.clone(),
                        },
                    }]
                })
                .collect()
        }
    }
}

/// Edges leaving `node` in `direction`, not already on `path`, ordered by key
fn next_edges<'a>(state: &'a GraphState, node: &NodeKey, direction: JoinDirection, path: &Path) -> Vec<&'a GraphEdge> {
    let mut edges = state.outgoing_edges(node);
    if direction == JoinDirection::Both {
        edges.extend(state.incoming_edges(node));
    }
    let used: HashSet<&EdgeKey> = path
        .iter()
        .filter_map(|h| match &h.hop {
            Hop::Edge { key, .. } => Some(key),
            Hop::Node(_) => None,
        })
        .collect();

    let mut seen = HashSet::new();
    let mut result: Vec<&GraphEdge> = edges
        .into_iter()
        .filter(|e| {
            let key = e.key();
            !used.contains(&key) && seen.insert(key)
        })
        .collect();
    result.sort_by_key(|e| e.key());
    result
}

fn extend(state: &GraphState, path: Path, direction: JoinDirection, filter: &StepFilter, step: usize) -> Vec<Path> {
    let Some(last) = path.last() else {
        return Vec::new();
    };
    let (position, after_edge) = match &last.hop {
        Hop::Node(key) => (key.clone(), false),
        Hop::Edge { arrived, .. } => (arrived.clone(), true),
    };

    let mut extended = Vec::new();
    match filter {
        StepFilter::Node(filter) if after_edge => {
            if node_matches(state, &position, filter) {
                let mut next = path.clone();
                next.push(PathHop {
                    step: Some(step),
                    hop: Hop::Node(position),
                });
                extended.push(next);
            }
        }
        StepFilter::Node(filter) => {
            for edge in next_edges(state, &position, direction, &path) {
                let Some(other) = edge.other_end(&position) else {
                    continue;
                };
                if !node_matches(state, other, filter) {
                    continue;
                }
                let mut next = path.clone();
                next.push(PathHop {
                    step: None,
                    hop: Hop::Edge {
                        key: edge.key(),
                        arrived: other.clone(),
                    },
                });
                next.push(PathHop {
                    step: Some(step),
                    hop: Hop::Node(other.clone()),
                });
                extended.push(next);
            }
        }
        StepFilter::Edge(filter) => {
            for edge in next_edges(state, &position, direction, &path) {
                if !edge_matches(edge, filter) {
                    continue;
                }
                let Some(other) = edge.other_end(&position) else {
                    continue;
                };
                let mut next = path.clone();
                next.push(PathHop {
                    step: Some(step),
                    hop: Hop::Edge {
                        key: edge.key(),
                        arrived: other.clone(),
                    },
                });
                extended.push(next);
            }
        }
    }
    extended
}

fn collect(state: &GraphState, select: &Select, paths: &[Path]) -> QueryResult {
    let mut result = QueryResult::ok();
    let mut seen_nodes = HashSet::new();
    let mut seen_edges = HashSet::new();

    for hop in paths.iter().flatten() {
        match &hop.hop {
            Hop::Node(key) => {
                if seen_nodes.insert(key.clone()) {
                    if let Some(node) = state.get_node(key) {
                        let mut node = node.clone();
                        node.links.clear();
                        result.nodes.push(node);
                    }
                }
            }
            Hop::Edge { key, .. } => {
                if seen_edges.insert(key.clone()) {
                    if let Some(edge) = state.get_edge(key) {
                        result.edges.push(edge.clone());
                    }
                }
            }
        }
    }

    for (index, step) in select.steps().enumerate() {
        let Some(alias) = &step.alias else {
            continue;
        };
        let bound = paths.iter().flatten().filter(|h| h.step == Some(index));
        let binding = match step.filter {
            StepFilter::Node(_) => {
                let mut keys: Vec<NodeKey> = Vec::new();
                for hop in bound {
                    if let Hop::Node(key) = &hop.hop {
                        if !keys.contains(key) {
                            keys.push(key.clone());
                        }
                    }
                }
                AliasBinding::Nodes(keys)
            }
            StepFilter::Edge(_) => {
                let mut keys: Vec<EdgeKey> = Vec::new();
                for hop in bound {
                    if let Hop::Edge { key, .. } = &hop.hop {
                        if !keys.contains(key) {
                            keys.push(key.clone());
                        }
                    }
                }
                AliasBinding::Edges(keys)
            }
        };
        result.aliases.push((alias.clone(), binding));
    }

    for name in &select.returns {
        for node in &result.nodes {
            let link = state.get_node(&node.key).and_then(|n| n.link(name));
            if let Some(link) = link {
                result.links.push(LinkValue {
                    node: node.key.clone(),
                    name: link.name.clone(),
                    data: link.to_base64(),
                });
            }
        }
    }

    result
}
