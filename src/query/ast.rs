//! Statement model for the command language
//!
//! Statements are a closed set; the executor matches them exhaustively.

use crate::graph::{DataLink, EdgeKey, EdgeType, NodeKey, Tags};

/// A parsed batch of statements in source order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    pub statements: Vec<Statement>,
}

impl Batch {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// True if no statement mutates the map
    pub fn is_read_only(&self) -> bool {
        self.statements.iter().all(Statement::is_read_only)
    }
}

/// One command
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    AddNode(AddNode),
    AddEdge(AddEdge),
    UpdateNode(UpdateNode),
    UpdateEdge(UpdateEdge),
    DeleteNode { key: NodeKey, if_exists: bool },
    DeleteEdge { key: EdgeKey, if_exists: bool },
    Select(Select),
}

impl Statement {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Statement::Select(_))
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::AddNode(_) => "add node",
            Statement::AddEdge(_) => "add edge",
            Statement::UpdateNode(_) => "set node",
            Statement::UpdateEdge(_) => "set edge",
            Statement::DeleteNode { .. } => "delete node",
            Statement::DeleteEdge { .. } => "delete edge",
            Statement::Select(_) => "select",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddNode {
    pub key: NodeKey,
    pub tags: Tags,
    /// Data blocks attached with `name { 'base64' }`
    pub links: Vec<DataLink>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddEdge {
    pub from: NodeKey,
    pub to: NodeKey,
    pub edge_type: EdgeType,
    pub tags: Tags,
}

impl AddEdge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.from.clone(), self.to.clone(), self.edge_type.clone())
    }
}

/// `set node`: merge `tags`, then drop the names in `removed`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateNode {
    pub key: NodeKey,
    pub tags: Tags,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEdge {
    pub key: EdgeKey,
    pub tags: Tags,
    pub removed: Vec<String>,
}

/// Direction of a join between two select steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDirection {
    /// `->` follows outgoing edges
    Outgoing,
    /// `<->` follows edges either way
    Both,
}

/// Node filter: exact key and/or required tags
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeFilter {
    pub key: Option<NodeKey>,
    pub tags: Tags,
}

/// Edge filter: any subset of the identity plus required tags
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EdgeFilter {
    pub from: Option<NodeKey>,
    pub to: Option<NodeKey>,
    pub edge_type: Option<EdgeType>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepFilter {
    Node(NodeFilter),
    Edge(EdgeFilter),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStep {
    pub filter: StepFilter,
    pub alias: Option<String>,
}

/// `select step (join step)* [return name, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// First step
    pub start: SelectStep,
    /// Subsequent steps with the join that reaches them
    pub joins: Vec<(JoinDirection, SelectStep)>,
    /// Data links to project from matched nodes
    pub returns: Vec<String>,
}

impl Select {
    /// All steps in order
    pub fn steps(&self) -> impl Iterator<Item = &SelectStep> {
        std::iter::once(&self.start).chain(self.joins.iter().map(|(_, step)| step))
    }

    /// First alias used more than once, if any
    pub fn duplicate_alias(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.steps()
            .filter_map(|s| s.alias.as_deref())
            .find(|alias| !seen.insert(alias.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_step(alias: Option<&str>) -> SelectStep {
        SelectStep {
            filter: StepFilter::Node(NodeFilter::default()),
            alias: alias.map(str::to_string),
        }
    }

    #[test]
    fn test_duplicate_alias() {
        let select = Select {
            start: node_step(Some("a")),
            joins: vec![(JoinDirection::Outgoing, node_step(Some("b"))), (JoinDirection::Both, node_step(Some("A")))],
            returns: vec![],
        };
        assert_eq!(select.duplicate_alias(), Some("A"));
        assert_eq!(select.steps().count(), 3);
    }

    #[test]
    fn test_read_only() {
        let select = Statement::Select(Select {
            start: node_step(None),
            joins: vec![],
            returns: vec![],
        });
        let delete = Statement::DeleteNode {
            key: NodeKey::new("n1"),
            if_exists: true,
        };
        assert!(Batch::new(vec![select.clone()]).is_read_only());
        assert!(!Batch::new(vec![select, delete]).is_read_only());
    }
}
