//! Secondary indices maintained alongside the graph map
//!
//! Unique alternate keys are stored as ordinary index nodes and edges.

pub mod unique;

pub use unique::{lookup as lookup_unique, UNIQUE_INDEX_EDGE_TYPE, UNIQUE_INDEX_TAG};
