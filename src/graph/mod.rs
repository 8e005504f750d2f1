//! Graph map
//!
//! Key-addressed nodes and `(from, to, type)` addressed edges, both tagged.
//! All mutation goes through the conflict-aware primitives on `GraphState`,
//! which record before/after images for the journal and for undo.

pub mod change;
pub mod edge;
pub mod index;
pub mod link;
pub mod node;
pub mod store;
pub mod tags;
pub mod types;

pub use change::{ChangeLog, EntityChange};
pub use edge::GraphEdge;
pub use index::{EdgeIndex, NodeIndex};
pub use link::DataLink;
pub use node::GraphNode;
pub use store::{AddMode, GraphError, GraphMap, GraphResult, GraphSnapshot, GraphState};
pub use tags::{Tag, Tags};
pub use types::{is_valid_key, EdgeKey, EdgeType, NodeKey, DEFAULT_EDGE_TYPE};
