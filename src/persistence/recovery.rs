//! Recovery: checkpoint plus journal replay
//!
//! Replay applies the after-image of every Action record newer than the
//! checkpoint, in sequence order, through the same `apply_change` the live
//! map uses. The rebuilt state therefore matches the live one exactly.

use super::checkpoint;
use super::journal::{read_stream, EntryKind, JournalEntry};
use super::storage::DataStore;
use super::{PersistenceError, PersistenceResult};
use crate::config::GraphConfig;
use crate::graph::{EntityChange, GraphMap, GraphState};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What recovery found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Sequence number stored in the checkpoint (0 without one)
    pub checkpoint_lsn: u64,
    pub actions_replayed: usize,
    /// Actions skipped because their transaction revoked them
    pub actions_revoked: usize,
    /// Map sequence number after replay
    pub last_lsn: u64,
    /// Highest sequence number seen in the journal, any record type
    pub max_journal_lsn: u64,
    /// Transactions with a Start but no Commit or Rollback
    pub unterminated_transactions: usize,
}

impl RecoveryReport {
    /// First sequence number a new writer may use
    pub fn next_lsn(&self) -> u64 {
        self.max_journal_lsn.max(self.checkpoint_lsn).max(self.last_lsn) + 1
    }
}

fn before_image_matches(state: &GraphState, change: &EntityChange) -> bool {
    match change {
        EntityChange::Node { key, before, .. } => state.get_node(key) == before.as_ref(),
        EntityChange::Edge { key, before, .. } => state.get_edge(key) == before.as_ref(),
    }
}

/// Replay journal entries onto `state`
pub fn replay(state: &mut GraphState, entries: &[JournalEntry]) -> PersistenceResult<RecoveryReport> {
    let mut report = RecoveryReport {
        checkpoint_lsn: state.last_lsn(),
        ..RecoveryReport::default()
    };

    let mut revoked: HashMap<Uuid, u64> = HashMap::new();
    let mut started: HashSet<Uuid> = HashSet::new();
    let mut finished: HashSet<Uuid> = HashSet::new();
    for entry in entries {
        match entry.kind {
            EntryKind::Start => {
                started.insert(entry.transaction_id);
            }
            EntryKind::Commit => {
                finished.insert(entry.transaction_id);
            }
            EntryKind::Rollback => {
                finished.insert(entry.transaction_id);
                if let Some(from) = entry.revoked_from {
                    revoked.insert(entry.transaction_id, from);
                }
            }
            EntryKind::Action => {}
        }
    }
    report.unterminated_transactions = started.difference(&finished).count();

    let mut previous = 0u64;
    for entry in entries {
        if entry.lsn <= previous {
            return Err(PersistenceError::InvalidJournal(format!(
                "sequence number {} follows {}",
                entry.lsn, previous
            )));
        }
        previous = entry.lsn;
        report.max_journal_lsn = entry.lsn;

        if entry.kind != EntryKind::Action || entry.lsn <= report.checkpoint_lsn {
            continue;
        }
        if revoked.get(&entry.transaction_id).is_some_and(|from| entry.lsn >= *from) {
            report.actions_revoked += 1;
            continue;
        }
        let Some(change) = &entry.change else {
            return Err(PersistenceError::InvalidJournal(format!("action {} has no change", entry.lsn)));
        };
        if !before_image_matches(state, change) {
            warn!("Action {} ({}) does not match the current state", entry.lsn, change);
        }
        state.apply_change(change);
        state.set_last_lsn(entry.lsn);
        report.actions_replayed += 1;
    }

    report.last_lsn = state.last_lsn();
    debug!(
        "Replayed {} actions ({} revoked), last lsn {}",
        report.actions_replayed, report.actions_revoked, report.last_lsn
    );
    Ok(report)
}

/// Load the checkpoint and replay the primary journal stream
pub async fn recover(store: &dyn DataStore, config: &GraphConfig) -> PersistenceResult<(GraphState, RecoveryReport)> {
    let mut state = match checkpoint::read(store, &config.checkpoint_path).await? {
        Some(snapshot) => GraphState::from_snapshot(snapshot)?,
        None => GraphState::new(),
    };

    let entries = read_stream(store, &config.journal_root, &config.journal_stream).await?;
    let report = replay(&mut state, &entries)?;

    info!(
        "Recovered graph: checkpoint lsn {}, {} actions replayed, last lsn {}, {} nodes, {} edges",
        report.checkpoint_lsn,
        report.actions_replayed,
        report.last_lsn,
        state.node_count(),
        state.edge_count()
    );
    if report.unterminated_transactions > 0 {
        warn!(
            "{} transactions were not terminated; their applied statements are kept",
            report.unterminated_transactions
        );
    }
    Ok((state, report))
}

/// Rebuild an independent map from storage, for verification
pub async fn rebuild(store: &dyn DataStore, config: &GraphConfig) -> PersistenceResult<GraphMap> {
    let (state, _) = recover(store, config).await?;
    Ok(GraphMap::from_state(state))
}
