//! Local directory store
//!
//! Blobs are files under a root directory. Replacing a blob writes a
//! temporary sibling and renames it into place. Leases are tracked in a
//! process-local table.

use super::lease::LeaseTable;
use super::storage::{normalize_path, DataStore, LeaseId, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    leases: LeaseTable,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        info!("Opened file store at {:?}", root);
        Ok(Self {
            root,
            leases: LeaseTable::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StorageResult<(String, PathBuf)> {
        let path = normalize_path(path)?;
        let full = path.split('/').fold(self.root.clone(), |acc, segment| acc.join(segment));
        Ok((path, full))
    }

    async fn ensure_parent(full: &Path) -> StorageResult<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for FileStore {
    async fn get(&self, path: &str) -> StorageResult<Option<Bytes>> {
        let (_, full) = self.resolve(path)?;
        match fs::read(&full).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, path: &str, data: Bytes, lease: Option<&LeaseId>) -> StorageResult<()> {
        let (path, full) = self.resolve(path)?;
        self.leases.check(&path, lease)?;
        Self::ensure_parent(&full).await?;

        let mut temp = full.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);

        let mut file = fs::File::create(&temp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, &full).await?;
        debug!("Wrote {} ({} bytes)", path, data.len());
        Ok(())
    }

    async fn append(&self, path: &str, data: Bytes, lease: Option<&LeaseId>) -> StorageResult<()> {
        let (path, full) = self.resolve(path)?;
        self.leases.check(&path, lease)?;
        Self::ensure_parent(&full).await?;

        let mut file = fs::OpenOptions::new().create(true).append(true).open(&full).await?;
        file.write_all(&data).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn delete(&self, path: &str, lease: Option<&LeaseId>) -> StorageResult<bool> {
        let (path, full) = self.resolve(path)?;
        self.leases.check(&path, lease)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn search(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = prefix.trim_start_matches('/');
        let mut found = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, relative)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = if relative.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", relative, name)
                };
                if entry.file_type().await?.is_dir() {
                    // only descend where the prefix can still match
                    if prefix.starts_with(&path) || path.starts_with(prefix) {
                        pending.push((entry.path(), path));
                    }
                } else if path.starts_with(prefix) && !path.ends_with(TEMP_SUFFIX) {
                    found.push(path);
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn acquire_lease(&self, path: &str, duration: Duration) -> StorageResult<LeaseId> {
        let (path, _) = self.resolve(path)?;
        self.leases.acquire(&path, Some(duration))
    }

    async fn acquire_exclusive_lease(&self, path: &str) -> StorageResult<LeaseId> {
        let (path, _) = self.resolve(path)?;
        self.leases.acquire(&path, None)
    }

    async fn break_lease(&self, path: &str) -> StorageResult<()> {
        let (path, _) = self.resolve(path)?;
        self.leases.break_lease(&path);
        Ok(())
    }

    async fn release(&self, path: &str, lease: &LeaseId) -> StorageResult<()> {
        let (path, _) = self.resolve(path)?;
        self.leases.release(&path, lease)
    }
}
