//! Checkpoints
//!
//! A checkpoint is one blob holding the whole map:
//!
//! ```text
//! [magic "KGCK"][version: u32 LE][sha256 of body: 32 bytes][body]
//! body = gzip(bincode(GraphSnapshot))
//! ```

use super::lease::{acquire_with_backoff, BackoffPolicy, LeaseKind};
use super::storage::{DataStore, StorageError};
use crate::graph::GraphSnapshot;
use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const MAGIC: &[u8; 4] = b"KGCK";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 32;

/// Checkpoint errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Invalid checkpoint format: {0}")]
    InvalidFormat(String),

    #[error("Checkpoint digest mismatch in {0}")]
    DigestMismatch(String),
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Serialize, compress and seal a snapshot
pub fn encode(snapshot: &GraphSnapshot) -> CheckpointResult<Bytes> {
    let raw = bincode::serialize(snapshot)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    let body = encoder.finish()?;

    let digest = Sha256::digest(&body);
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_slice(MAGIC);
    buf.put_u32_le(FORMAT_VERSION);
    buf.put_slice(&digest);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Verify and decode a checkpoint blob
pub fn decode(path: &str, data: &[u8]) -> CheckpointResult<GraphSnapshot> {
    if data.len() < HEADER_LEN || &data[..4] != MAGIC {
        return Err(CheckpointError::InvalidFormat(format!("{} is not a checkpoint", path)));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(CheckpointError::InvalidFormat(format!(
            "{} has unsupported version {}",
            path, version
        )));
    }

    let expected = &data[8..HEADER_LEN];
    let body = &data[HEADER_LEN..];
    if Sha256::digest(body).as_slice() != expected {
        return Err(CheckpointError::DigestMismatch(path.to_string()));
    }

    let mut raw = Vec::new();
    GzDecoder::new(body).read_to_end(&mut raw)?;
    Ok(bincode::deserialize(&raw)?)
}

/// Settings for checkpoint writes
#[derive(Debug, Clone)]
pub struct CheckpointOptions {
    pub path: String,
    pub lease_duration: Duration,
    pub backoff: BackoffPolicy,
}

/// Write a checkpoint under a lease on its path; returns the blob size
pub async fn write(store: &dyn DataStore, options: &CheckpointOptions, snapshot: &GraphSnapshot) -> CheckpointResult<usize> {
    let data = encode(snapshot)?;
    let size = data.len();

    let lease = acquire_with_backoff(
        store,
        &options.path,
        LeaseKind::Timed(options.lease_duration),
        &options.backoff,
    )
    .await?;
    let written = store.set(&options.path, data, Some(&lease)).await;
    if let Err(e) = store.release(&options.path, &lease).await {
        warn!("Could not release checkpoint lease on {}: {}", options.path, e);
    }
    written?;

    info!(
        "Checkpoint written to {} at lsn {} ({} nodes, {} edges, {} bytes)",
        options.path,
        snapshot.last_lsn,
        snapshot.nodes.len(),
        snapshot.edges.len(),
        size
    );
    Ok(size)
}

/// Load the checkpoint, if one exists
pub async fn read(store: &dyn DataStore, path: &str) -> CheckpointResult<Option<GraphSnapshot>> {
    let Some(data) = store.get(path).await? else {
        debug!("No checkpoint at {}", path);
        return Ok(None);
    };
    let snapshot = decode(path, &data)?;
    info!(
        "Loaded checkpoint {} at lsn {} ({} nodes, {} edges)",
        path,
        snapshot.last_lsn,
        snapshot.nodes.len(),
        snapshot.edges.len()
    );
    Ok(Some(snapshot))
}
