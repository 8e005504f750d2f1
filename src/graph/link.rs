//! Data links: opaque payloads attached to a node under a name

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Named payload attached to a node, keyed by `(node key, name)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLink {
    pub name: String,
    pub payload: Vec<u8>,
}

impl DataLink {
    pub fn new(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Decode a payload written as base64 in a data block
    pub fn from_base64(name: impl Into<String>, text: &str) -> Result<Self, base64::DecodeError> {
        let payload = STANDARD.decode(text.trim())?;
        Ok(Self::new(name, payload))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.payload)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
