//! Command language parser using Pest
//!
//! Every field of a statement body is a tag; the reserved names `key`,
//! `from`, `to` and `type` are pulled out into the statement identity.

use crate::graph::{is_valid_key, DataLink, EdgeKey, EdgeType, NodeKey, Tag, Tags, DEFAULT_EDGE_TYPE};
use crate::query::ast::*;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "query/grammar.pest"]
struct CommandParser;

/// Parser errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Input does not match the grammar
    #[error("Syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// Input parses but a statement is malformed
    #[error("Invalid statement {statement}: {message}")]
    Semantic { statement: usize, message: String },
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let (line, column) = match err.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        ParseError::Syntax {
            line,
            column,
            message: err.variant.message().to_string(),
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse command text into a batch
pub fn parse_batch(input: &str) -> ParseResult<Batch> {
    let pairs = CommandParser::parse(Rule::batch, input)?;

    let mut statements = Vec::new();
    for pair in pairs {
        if pair.as_rule() != Rule::batch {
            continue;
        }
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::statement => {
                    let index = statements.len();
                    let statement = parse_statement(inner).map_err(|message| ParseError::Semantic {
                        statement: index,
                        message,
                    })?;
                    statements.push(statement);
                }
                Rule::EOI => break,
                _ => {}
            }
        }
    }

    Ok(Batch::new(statements))
}

type StatementResult<T> = Result<T, String>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Entity {
    Node,
    Edge,
}

/// Tags collected from a body, with `-name` removals kept apart
#[derive(Debug, Default)]
struct TagBody {
    tags: Tags,
    removed: Vec<String>,
}

impl TagBody {
    /// Pull a reserved field out of the body
    fn take(&mut self, name: &str) -> Option<String> {
        self.tags.remove(name).map(|t| t.value.unwrap_or_default())
    }

    fn take_node_key(&mut self, name: &str) -> StatementResult<Option<NodeKey>> {
        match self.take(name) {
            None => Ok(None),
            Some(value) if is_valid_key(&value) => Ok(Some(NodeKey::new(value))),
            Some(value) => Err(format!("invalid {} '{}'", name, value)),
        }
    }

    fn take_edge_type(&mut self) -> StatementResult<Option<EdgeType>> {
        match self.take("type") {
            None => Ok(None),
            Some(value) => EdgeType::parse(&value)
                .map(Some)
                .ok_or_else(|| format!("invalid type '{}'", value)),
        }
    }

    fn require_node_key(&mut self, name: &str) -> StatementResult<NodeKey> {
        self.take_node_key(name)?.ok_or_else(|| format!("missing {}=", name))
    }

    fn no_removals(&self) -> StatementResult<()> {
        match self.removed.first() {
            Some(name) => Err(format!("tag removal '-{}' is only allowed in set", name)),
            None => Ok(()),
        }
    }
}

fn parse_statement(pair: Pair<Rule>) -> StatementResult<Statement> {
    let Some(inner) = pair.into_inner().next() else {
        return Err("empty statement".to_string());
    };
    match inner.as_rule() {
        Rule::add_stmt => parse_add(inner),
        Rule::set_stmt => parse_set(inner),
        Rule::delete_stmt => parse_delete(inner),
        Rule::select_stmt => parse_select(inner),
        rule => Err(format!("unexpected {:?}", rule)),
    }
}

fn parse_entity(pair: Pair<Rule>) -> Entity {
    match pair.into_inner().next().map(|p| p.as_rule()) {
        Some(Rule::kw_edge) => Entity::Edge,
        _ => Entity::Node,
    }
}

fn parse_add(pair: Pair<Rule>) -> StatementResult<Statement> {
    let mut entity = Entity::Node;
    let mut body = TagBody::default();
    let mut links = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::entity => entity = parse_entity(inner),
            Rule::body => body = parse_body(inner)?,
            Rule::data_block => links.push(parse_data_block(inner)?),
            _ => {}
        }
    }
    body.no_removals()?;

    match entity {
        Entity::Node => {
            let key = body.require_node_key("key")?;
            Ok(Statement::AddNode(AddNode {
                key,
                tags: body.tags,
                links,
            }))
        }
        Entity::Edge => {
            if !links.is_empty() {
                return Err("data blocks are only allowed on nodes".to_string());
            }
            let from = body.require_node_key("from")?;
            let to = body.require_node_key("to")?;
            let edge_type = body.take_edge_type()?.unwrap_or_else(|| EdgeType::new(DEFAULT_EDGE_TYPE));
            Ok(Statement::AddEdge(AddEdge {
                from,
                to,
                edge_type,
                tags: body.tags,
            }))
        }
    }
}

fn parse_set(pair: Pair<Rule>) -> StatementResult<Statement> {
    let (entity, mut body) = parse_entity_and_body(pair)?;
    match entity {
        Entity::Node => {
            let key = body.require_node_key("key")?;
            Ok(Statement::UpdateNode(UpdateNode {
                key,
                tags: body.tags,
                removed: body.removed,
            }))
        }
        Entity::Edge => {
            let key = edge_identity(&mut body)?;
            Ok(Statement::UpdateEdge(UpdateEdge {
                key,
                tags: body.tags,
                removed: body.removed,
            }))
        }
    }
}

fn parse_delete(pair: Pair<Rule>) -> StatementResult<Statement> {
    let if_exists = pair.clone().into_inner().any(|p| p.as_rule() == Rule::if_exist);
    let (entity, mut body) = parse_entity_and_body(pair)?;
    body.no_removals()?;

    let statement = match entity {
        Entity::Node => Statement::DeleteNode {
            key: body.require_node_key("key")?,
            if_exists,
        },
        Entity::Edge => Statement::DeleteEdge {
            key: edge_identity(&mut body)?,
            if_exists,
        },
    };
    if !body.tags.is_empty() {
        return Err(format!("unexpected tags on delete: {}", body.tags));
    }
    Ok(statement)
}

fn parse_entity_and_body(pair: Pair<Rule>) -> StatementResult<(Entity, TagBody)> {
    let mut entity = Entity::Node;
    let mut body = TagBody::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::entity => entity = parse_entity(inner),
            Rule::body => body = parse_body(inner)?,
            _ => {}
        }
    }
    Ok((entity, body))
}

fn edge_identity(body: &mut TagBody) -> StatementResult<EdgeKey> {
    let from = body.require_node_key("from")?;
    let to = body.require_node_key("to")?;
    let edge_type = body.take_edge_type()?.unwrap_or_default();
    Ok(EdgeKey::new(from, to, edge_type))
}

/// Collect every tag list under a body (bracketed and trailing)
fn parse_body(pair: Pair<Rule>) -> StatementResult<TagBody> {
    let mut body = TagBody::default();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::tag_list {
            parse_tag_list(inner, &mut body)?;
        }
    }
    Ok(body)
}

fn parse_tag_list(pair: Pair<Rule>, body: &mut TagBody) -> StatementResult<()> {
    for tag_pair in pair.into_inner() {
        let mut removal = false;
        let mut name = None;
        let mut value = None;
        for part in tag_pair.into_inner() {
            match part.as_rule() {
                Rule::removal => removal = true,
                Rule::tag_name => name = Some(part.as_str().to_string()),
                Rule::tag_value => value = Some(parse_value(part)),
                _ => {}
            }
        }
        let Some(name) = name else {
            continue;
        };
        if removal {
            if value.is_some() {
                return Err(format!("tag removal '-{}' cannot carry a value", name));
            }
            body.removed.push(name);
        } else if body.tags.set(Tag::new(name.clone(), value)).is_some() {
            return Err(format!("duplicate tag '{}'", name));
        }
    }
    Ok(())
}

fn parse_value(pair: Pair<Rule>) -> String {
    let Some(inner) = pair.into_inner().next() else {
        return String::new();
    };
    match inner.as_rule() {
        Rule::quoted => unquote(inner),
        _ => inner.as_str().to_string(),
    }
}

fn unquote(pair: Pair<Rule>) -> String {
    pair.into_inner().next().map(|p| p.as_str().to_string()).unwrap_or_default()
}

fn parse_data_block(pair: Pair<Rule>) -> StatementResult<DataLink> {
    let mut name = None;
    let mut payload = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::link_name => name = Some(inner.as_str().to_string()),
            Rule::quoted => payload = Some(unquote(inner)),
            _ => {}
        }
    }
    let name = name.ok_or("data block without a name")?;
    let payload = payload.unwrap_or_default();
    DataLink::from_base64(name.clone(), payload.trim()).map_err(|e| format!("data block '{}': {}", name, e))
}

fn parse_select(pair: Pair<Rule>) -> StatementResult<Statement> {
    let mut start = None;
    let mut joins = Vec::new();
    let mut pending_join = None;
    let mut returns = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::step => {
                let step = parse_step(inner)?;
                match pending_join.take() {
                    Some(direction) => joins.push((direction, step)),
                    None => start = Some(step),
                }
            }
            Rule::join => {
                let direction = match inner.into_inner().next().map(|p| p.as_rule()) {
                    Some(Rule::both_join) => JoinDirection::Both,
                    _ => JoinDirection::Outgoing,
                };
                pending_join = Some(direction);
            }
            Rule::return_clause => {
                returns = inner
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::link_name)
                    .map(|p| p.as_str().to_string())
                    .collect();
            }
            _ => {}
        }
    }

    let start = start.ok_or("select without a step")?;
    Ok(Statement::Select(Select { start, joins, returns }))
}

fn parse_step(pair: Pair<Rule>) -> StatementResult<SelectStep> {
    let mut filter = None;
    let mut alias = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::node_step => {
                let mut body = parse_step_body(inner)?;
                filter = Some(StepFilter::Node(NodeFilter {
                    key: body.take_node_key("key")?,
                    tags: body.tags,
                }));
            }
            Rule::edge_step => {
                let mut body = parse_step_body(inner)?;
                filter = Some(StepFilter::Edge(EdgeFilter {
                    from: body.take_node_key("from")?,
                    to: body.take_node_key("to")?,
                    edge_type: body.take_edge_type()?,
                    tags: body.tags,
                }));
            }
            Rule::alias => alias = Some(inner.as_str().to_string()),
            _ => {}
        }
    }
    let filter = filter.ok_or("empty select step")?;
    Ok(SelectStep { filter, alias })
}

fn parse_step_body(pair: Pair<Rule>) -> StatementResult<TagBody> {
    let mut body = TagBody::default();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::tag_list {
            parse_tag_list(inner, &mut body)?;
        }
    }
    body.no_removals()?;
    Ok(body)
}
