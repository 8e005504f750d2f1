//! In-memory store, used for tests and ephemeral graphs

use super::lease::LeaseTable;
use super::storage::{normalize_path, DataStore, LeaseId, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    leases: LeaseTable,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes held, across all blobs
    pub async fn size(&self) -> usize {
        self.blobs.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get(&self, path: &str) -> StorageResult<Option<Bytes>> {
        let path = normalize_path(path)?;
        Ok(self.blobs.read().await.get(&path).map(|b| Bytes::copy_from_slice(b)))
    }

    async fn set(&self, path: &str, data: Bytes, lease: Option<&LeaseId>) -> StorageResult<()> {
        let path = normalize_path(path)?;
        self.leases.check(&path, lease)?;
        self.blobs.write().await.insert(path, data.to_vec());
        Ok(())
    }

    async fn append(&self, path: &str, data: Bytes, lease: Option<&LeaseId>) -> StorageResult<()> {
        let path = normalize_path(path)?;
        self.leases.check(&path, lease)?;
        self.blobs.write().await.entry(path).or_default().extend_from_slice(&data);
        Ok(())
    }

    async fn delete(&self, path: &str, lease: Option<&LeaseId>) -> StorageResult<bool> {
        let path = normalize_path(path)?;
        self.leases.check(&path, lease)?;
        Ok(self.blobs.write().await.remove(&path).is_some())
    }

    async fn search(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = prefix.trim_start_matches('/');
        let blobs = self.blobs.read().await;
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect())
    }

    async fn acquire_lease(&self, path: &str, duration: Duration) -> StorageResult<LeaseId> {
        self.leases.acquire(&normalize_path(path)?, Some(duration))
    }

    async fn acquire_exclusive_lease(&self, path: &str) -> StorageResult<LeaseId> {
        self.leases.acquire(&normalize_path(path)?, None)
    }

    async fn break_lease(&self, path: &str) -> StorageResult<()> {
        self.leases.break_lease(&normalize_path(path)?);
        Ok(())
    }

    async fn release(&self, path: &str, lease: &LeaseId) -> StorageResult<()> {
        self.leases.release(&normalize_path(path)?, lease)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::StorageError;

    #[tokio::test]
    async fn test_set_get_append_delete() {
        let store = MemoryStore::new();
        assert!(store.get("a/b").await.unwrap().is_none());

        store.set("a/b", Bytes::from_static(b"hello"), None).await.unwrap();
        store.append("a/b", Bytes::from_static(b" world"), None).await.unwrap();
        assert_eq!(store.get("/a//b").await.unwrap().unwrap(), Bytes::from_static(b"hello world"));

        assert!(store.delete("a/b", None).await.unwrap());
        assert!(!store.delete("a/b", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_prefix() {
        let store = MemoryStore::new();
        for path in ["journal/tx/2.log", "journal/tx/1.log", "journal/trace/1.log", "checkpoint/graph.ckpt"] {
            store.set(path, Bytes::new(), None).await.unwrap();
        }
        let found = store.search("journal/tx/").await.unwrap();
        assert_eq!(found, vec!["journal/tx/1.log".to_string(), "journal/tx/2.log".to_string()]);
        assert_eq!(store.search("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_leased_path_requires_lease() {
        let store = MemoryStore::new();
        let lease = store.acquire_lease("ckpt", Duration::from_secs(30)).await.unwrap();

        let denied = store.set("ckpt", Bytes::from_static(b"x"), None).await;
        assert!(matches!(denied, Err(StorageError::Locked(_))));
        store.set("ckpt", Bytes::from_static(b"x"), Some(&lease)).await.unwrap();

        store.release("ckpt", &lease).await.unwrap();
        store.set("ckpt", Bytes::from_static(b"y"), None).await.unwrap();
    }
}
