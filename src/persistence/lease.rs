//! Lease bookkeeping and acquisition with randomized backoff

use super::storage::{DataStore, LeaseId, StorageError, StorageResult};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct ActiveLease {
    id: LeaseId,
    /// `None` for exclusive leases
    expires: Option<Instant>,
}

impl ActiveLease {
    fn is_live(&self, now: Instant) -> bool {
        self.expires.map_or(true, |at| at > now)
    }
}

/// Process-local lease table shared by the built-in stores
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: Mutex<HashMap<String, ActiveLease>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_leases<T>(&self, f: impl FnOnce(&mut HashMap<String, ActiveLease>) -> T) -> T {
        let mut leases = self.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut leases)
    }

    /// Grant a lease unless a live one exists. `None` duration never expires.
    pub fn acquire(&self, path: &str, duration: Option<Duration>) -> StorageResult<LeaseId> {
        let now = Instant::now();
        self.with_leases(|leases| {
            leases.retain(|_, l| l.is_live(now));
            if leases.contains_key(path) {
                return Err(StorageError::Conflict(path.to_string()));
            }
            let id = LeaseId::new();
            leases.insert(
                path.to_string(),
                ActiveLease {
                    id: id.clone(),
                    expires: duration.map(|d| now + d),
                },
            );
            Ok(id)
        })
    }

    /// Number of tracked leases, expired ones included until the next acquire
    pub fn len(&self) -> usize {
        self.with_leases(|leases| leases.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail with `Locked` if `path` is leased by someone other than `lease`
    pub fn check(&self, path: &str, lease: Option<&LeaseId>) -> StorageResult<()> {
        let now = Instant::now();
        self.with_leases(|leases| match leases.get(path) {
            Some(active) if active.is_live(now) && Some(&active.id) != lease => Err(StorageError::Locked(path.to_string())),
            _ => Ok(()),
        })
    }

    pub fn break_lease(&self, path: &str) -> bool {
        self.with_leases(|leases| leases.remove(path).is_some())
    }

    /// Release `lease`. Releasing an expired or already broken lease is a no-op.
    pub fn release(&self, path: &str, lease: &LeaseId) -> StorageResult<()> {
        let now = Instant::now();
        self.with_leases(|leases| match leases.get(path) {
            Some(active) if &active.id == lease => {
                leases.remove(path);
                Ok(())
            }
            Some(active) if active.is_live(now) => Err(StorageError::Conflict(path.to_string())),
            _ => Ok(()),
        })
    }
}

/// How long to keep retrying a contended lease
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total time to keep retrying before failing with `Locked`
    pub wait: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(5),
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl BackoffPolicy {
    fn next_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = (self.max_delay.as_millis() as u64).max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Kind of lease to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseKind {
    Timed(Duration),
    Exclusive,
}

/// Acquire a lease, retrying `Conflict` with randomized backoff until the
/// policy's wait elapses, then fail with `Locked`.
pub async fn acquire_with_backoff(
    store: &dyn DataStore,
    path: &str,
    kind: LeaseKind,
    policy: &BackoffPolicy,
) -> StorageResult<LeaseId> {
    let deadline = Instant::now() + policy.wait;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let attempt = match kind {
            LeaseKind::Timed(duration) => store.acquire_lease(path, duration).await,
            LeaseKind::Exclusive => store.acquire_exclusive_lease(path).await,
        };
        match attempt {
            Ok(id) => return Ok(id),
            Err(StorageError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            debug!("Gave up on lease {} after {} attempts", path, attempts);
            return Err(StorageError::Locked(path.to_string()));
        }
        let delay = policy.next_delay().min(deadline - now);
        debug!("Lease {} contended, retrying in {:?}", path, delay);
        tokio::time::sleep(delay).await;
    }
}
