//! Write-ahead journal
//!
//! Each stream is a sequence of segment blobs named by the first sequence
//! number they may contain (`<root>/<stream>/<lsn:016x>.log`). A segment is a
//! run of frames:
//!
//! ```text
//! [len: u32 LE][crc32: u32 LE][bincode JournalEntry; len bytes]
//! ```
//!
//! An incomplete or checksum-failing frame at the very end of a segment is a
//! torn write and is dropped; anywhere else it is corruption. After a failed
//! append the writer moves on to a fresh segment so a torn frame always stays
//! at a segment tail.

use super::lease::{acquire_with_backoff, BackoffPolicy, LeaseKind};
use super::storage::{join_path, DataStore, LeaseId, StorageError};
use crate::graph::EntityChange;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const FRAME_HEADER_LEN: usize = 8;
const SEGMENT_SUFFIX: &str = ".log";

/// Journal errors
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Damaged frame before the end of a segment
    #[error("Journal corruption in {path} at offset {offset}")]
    Corruption { path: String, offset: usize },

    #[error("Invalid journal entry: {0}")]
    InvalidEntry(String),
}

pub type JournalResult<T> = Result<T, JournalError>;

/// Record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Start,
    Action,
    Commit,
    Rollback,
}

/// One durable record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub kind: EntryKind,
    pub lsn: u64,
    pub transaction_id: Uuid,
    pub logged_at: DateTime<Utc>,
    /// Before/after images; set on Action records
    pub change: Option<EntityChange>,
    /// On Rollback: Action records of this transaction from this sequence
    /// number on were never applied
    pub revoked_from: Option<u64>,
}

impl JournalEntry {
    fn new(kind: EntryKind, lsn: u64, transaction_id: Uuid) -> Self {
        Self {
            kind,
            lsn,
            transaction_id,
            logged_at: Utc::now(),
            change: None,
            revoked_from: None,
        }
    }
}

/// Append one framed entry to `buf`
pub fn encode_frame(entry: &JournalEntry, buf: &mut BytesMut) -> JournalResult<()> {
    let payload = bincode::serialize(entry)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| JournalError::InvalidEntry(format!("entry {} too large", entry.lsn)))?;
    buf.reserve(FRAME_HEADER_LEN + payload.len());
    buf.put_u32_le(len);
    buf.put_u32_le(crc32fast::hash(&payload));
    buf.put_slice(&payload);
    Ok(())
}

/// Frames decoded from one segment
#[derive(Debug, Default)]
pub struct DecodedSegment {
    pub entries: Vec<JournalEntry>,
    /// Length of the intact prefix
    pub valid_len: usize,
    /// True if a torn frame was dropped from the tail
    pub torn: bool,
}

/// Decode every frame in a segment blob
pub fn decode_segment(path: &str, data: &[u8]) -> JournalResult<DecodedSegment> {
    let mut decoded = DecodedSegment::default();
    let mut offset = 0usize;

    while offset < data.len() {
        let remaining = data.len() - offset;
        if remaining < FRAME_HEADER_LEN {
            decoded.torn = true;
            break;
        }
        let header = &data[offset..offset + FRAME_HEADER_LEN];
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let end = offset + FRAME_HEADER_LEN + len;
        if end > data.len() {
            decoded.torn = true;
            break;
        }

        let payload = &data[offset + FRAME_HEADER_LEN..end];
        if crc32fast::hash(payload) != crc {
            if end == data.len() {
                decoded.torn = true;
                break;
            }
            return Err(JournalError::Corruption {
                path: path.to_string(),
                offset,
            });
        }

        let entry: JournalEntry = bincode::deserialize(payload)?;
        decoded.entries.push(entry);
        offset = end;
        decoded.valid_len = offset;
    }

    Ok(decoded)
}

fn stream_dir(root: &str, stream: &str) -> String {
    join_path(root, stream)
}

fn segment_path(dir: &str, first_lsn: u64) -> String {
    join_path(dir, &format!("{:016x}{}", first_lsn, SEGMENT_SUFFIX))
}

/// Segments of a stream as `(first_lsn, path)`, ordered
pub async fn list_segments(store: &dyn DataStore, root: &str, stream: &str) -> JournalResult<Vec<(u64, String)>> {
    let dir = stream_dir(root, stream);
    let prefix = format!("{}/", dir);
    let mut segments = Vec::new();
    for path in store.search(&prefix).await? {
        let name = &path[prefix.len()..];
        let Some(hex) = name.strip_suffix(SEGMENT_SUFFIX) else {
            continue;
        };
        if hex.contains('/') {
            continue;
        }
        match u64::from_str_radix(hex, 16) {
            Ok(lsn) => segments.push((lsn, path)),
            Err(_) => warn!("Ignoring unexpected journal blob {}", path),
        }
    }
    segments.sort();
    Ok(segments)
}

/// Read all entries of a stream in order, skipping torn tails
pub async fn read_stream(store: &dyn DataStore, root: &str, stream: &str) -> JournalResult<Vec<JournalEntry>> {
    let mut entries = Vec::new();
    for (_, path) in list_segments(store, root, stream).await? {
        let Some(data) = store.get(&path).await? else {
            continue;
        };
        let decoded = decode_segment(&path, &data)?;
        if decoded.torn {
            warn!(
                "Ignoring torn record at the end of {} ({} of {} bytes intact)",
                path,
                decoded.valid_len,
                data.len()
            );
        }
        entries.extend(decoded.entries);
    }
    Ok(entries)
}

/// Single-writer handle on one stream
#[derive(Debug)]
pub struct JournalStream {
    store: Arc<dyn DataStore>,
    name: String,
    dir: String,
    lock_path: String,
    lease: LeaseId,
    segment: String,
}

impl JournalStream {
    /// Take the stream's writer lease and start a segment at `next_lsn`
    pub async fn open(
        store: Arc<dyn DataStore>,
        root: &str,
        name: &str,
        next_lsn: u64,
        policy: &BackoffPolicy,
    ) -> JournalResult<Self> {
        let dir = stream_dir(root, name);
        let lock_path = format!("{}.lock", dir);
        let lease = acquire_with_backoff(store.as_ref(), &lock_path, LeaseKind::Exclusive, policy).await?;

        let stream = Self {
            segment: segment_path(&dir, next_lsn),
            store,
            name: name.to_string(),
            dir,
            lock_path,
            lease,
        };
        if let Err(e) = stream.repair_tails(root).await {
            stream.abandon().await;
            return Err(e);
        }
        info!("Opened journal stream '{}' at lsn {}", stream.name, next_lsn);
        Ok(stream)
    }

    /// Release the lease after a failed open, keeping the original error
    async fn abandon(self) {
        let name = self.name.clone();
        if let Err(e) = self.close().await {
            warn!("Could not release writer lease of journal stream '{}': {}", name, e);
        }
    }

    /// Cut torn frames off existing segments so later reads see clean tails
    async fn repair_tails(&self, root: &str) -> JournalResult<()> {
        for (_, path) in list_segments(self.store.as_ref(), root, &self.name).await? {
            let Some(data) = self.store.get(&path).await? else {
                continue;
            };
            let decoded = decode_segment(&path, &data)?;
            if decoded.torn {
                warn!("Truncating torn tail of {} to {} bytes", path, decoded.valid_len);
                self.store.set(&path, data.slice(..decoded.valid_len), None).await?;
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start writing a new segment whose first record is `first_lsn`
    pub fn rotate(&mut self, first_lsn: u64) {
        self.segment = segment_path(&self.dir, first_lsn);
        debug!("Journal stream '{}' rotated to {}", self.name, self.segment);
    }

    async fn append(&mut self, frames: Bytes) -> JournalResult<()> {
        self.store.append(&self.segment, frames, None).await?;
        Ok(())
    }

    /// Delete every segment except the one being written
    pub async fn truncate(&mut self, root: &str) -> JournalResult<usize> {
        let mut removed = 0;
        for (_, path) in list_segments(self.store.as_ref(), root, &self.name).await? {
            if path == self.segment {
                continue;
            }
            if self.store.delete(&path, None).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} checkpointed segments from journal stream '{}'", removed, self.name);
        }
        Ok(removed)
    }

    pub async fn close(self) -> JournalResult<()> {
        self.store.release(&self.lock_path, &self.lease).await?;
        Ok(())
    }
}

/// Settings for opening a journal
#[derive(Debug, Clone)]
pub struct JournalOptions {
    pub root: String,
    pub stream: String,
    pub trace_stream: Option<String>,
    pub backoff: BackoffPolicy,
}

/// Primary journal plus an optional trace stream carrying the same records
#[derive(Debug)]
pub struct Journal {
    root: String,
    primary: JournalStream,
    trace: Option<JournalStream>,
    next_lsn: u64,
    actions_since_checkpoint: u64,
}

impl Journal {
    /// Open for writing. `next_lsn` must exceed every sequence number
    /// already present in the stream.
    pub async fn open(store: Arc<dyn DataStore>, options: &JournalOptions, next_lsn: u64) -> JournalResult<Self> {
        let primary = JournalStream::open(store.clone(), &options.root, &options.stream, next_lsn, &options.backoff).await?;
        let trace = match &options.trace_stream {
            Some(name) => match JournalStream::open(store, &options.root, name, next_lsn, &options.backoff).await {
                Ok(trace) => Some(trace),
                Err(e) => {
                    primary.abandon().await;
                    return Err(e);
                }
            },
            None => None,
        };
        Ok(Self {
            root: options.root.clone(),
            primary,
            trace,
            next_lsn,
            actions_since_checkpoint: 0,
        })
    }

    /// Sequence number the next record will get
    pub fn next_lsn(&self) -> u64 {
        self.next_lsn
    }

    pub fn actions_since_checkpoint(&self) -> u64 {
        self.actions_since_checkpoint
    }

    /// Assign sequence numbers and write `entries` as one append. Numbers are
    /// consumed even if the write fails, so they are never reused.
    async fn write(&mut self, mut entries: Vec<JournalEntry>) -> JournalResult<u64> {
        let mut buf = BytesMut::new();
        for entry in entries.iter_mut() {
            entry.lsn = self.next_lsn;
            self.next_lsn += 1;
            encode_frame(entry, &mut buf)?;
        }
        let last = self.next_lsn - 1;
        let frames = buf.freeze();

        if let Err(e) = self.primary.append(frames.clone()).await {
            self.primary.rotate(self.next_lsn);
            return Err(e);
        }
        if let Some(trace) = self.trace.as_mut() {
            if let Err(e) = trace.append(frames).await {
                warn!("Trace stream '{}' write failed: {}", trace.name(), e);
                trace.rotate(self.next_lsn);
            }
        }
        Ok(last)
    }

    pub async fn start(&mut self, transaction_id: Uuid) -> JournalResult<u64> {
        self.write(vec![JournalEntry::new(EntryKind::Start, 0, transaction_id)]).await
    }

    /// Write one Action record per change; returns the last sequence number
    pub async fn append_actions<'c>(
        &mut self,
        transaction_id: Uuid,
        changes: impl IntoIterator<Item = &'c EntityChange>,
    ) -> JournalResult<u64> {
        let entries: Vec<JournalEntry> = changes
            .into_iter()
            .map(|change| {
                let mut entry = JournalEntry::new(EntryKind::Action, 0, transaction_id);
                entry.change = Some(change.clone());
                entry
            })
            .collect();
        if entries.is_empty() {
            return Err(JournalError::InvalidEntry("action write without changes".to_string()));
        }
        let count = entries.len() as u64;
        let last = self.write(entries).await?;
        self.actions_since_checkpoint += count;
        Ok(last)
    }

    pub async fn commit(&mut self, transaction_id: Uuid) -> JournalResult<u64> {
        self.write(vec![JournalEntry::new(EntryKind::Commit, 0, transaction_id)]).await
    }

    /// Close an aborted transaction. `revoked_from` marks the first Action
    /// that did not stay applied.
    pub async fn rollback(&mut self, transaction_id: Uuid, revoked_from: Option<u64>) -> JournalResult<u64> {
        let mut entry = JournalEntry::new(EntryKind::Rollback, 0, transaction_id);
        entry.revoked_from = revoked_from;
        self.write(vec![entry]).await
    }

    /// Begin new segments after a checkpoint, optionally dropping old ones
    pub async fn checkpointed(&mut self, truncate: bool) -> JournalResult<()> {
        self.actions_since_checkpoint = 0;
        self.primary.rotate(self.next_lsn);
        if let Some(trace) = self.trace.as_mut() {
            trace.rotate(self.next_lsn);
        }
        if truncate {
            self.primary.truncate(&self.root).await?;
        }
        Ok(())
    }

    /// Release the writer leases
    pub async fn close(self) -> JournalResult<()> {
        self.primary.close().await?;
        if let Some(trace) = self.trace {
            trace.close().await?;
        }
        Ok(())
    }
}
