//! Command language
//!
//! ```text
//! add node key=node1, t1, name=value;
//! add edge from=node1, to=node2, type=default;
//! set node key=node1, t2, -t1;
//! delete node ifexist key=node1;
//! select (key=node1) -> [type=default] return contract;
//! ```

pub mod ast;
pub mod executor;
pub mod parser;
pub mod result;

pub use ast::{Batch, Statement};
pub use executor::{ExecutorOptions, QueryExecutor, DEFAULT_MAX_JOIN_DEPTH};
pub use parser::{parse_batch, ParseError, ParseResult};
pub use result::{AliasBinding, LinkValue, QueryBatchResult, QueryResult, StatusCode};
