//! Cache stores
//!
//! The response cache talks to a [`CacheStore`]; the store decides whether
//! entries live per worker (memory) or are shared between workers (files).

use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::error::{HarborError, HarborResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Key-addressed persistent store for cache entries
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> HarborResult<Option<CacheEntry>>;

    /// Insert or replace the entry under `entry.key`
    async fn put(&self, entry: CacheEntry) -> HarborResult<()>;

    /// Remove an entry; returns whether it existed
    async fn delete(&self, key: &CacheKey) -> HarborResult<bool>;

    async fn keys(&self) -> HarborResult<Vec<CacheKey>>;

    /// Delete entries that exist but can no longer be decoded
    ///
    /// Such entries have no readable key, so [`CacheStore::keys`] never lists them.
    async fn purge_unreadable(&self) -> HarborResult<Purged> {
        Ok(Purged::default())
    }
}

/// Unreadable entries handled by [`CacheStore::purge_unreadable`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Purged {
    pub removed: usize,
    pub failed: usize,
}

/// Per-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> HarborResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> HarborResult<()> {
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> HarborResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> HarborResult<Vec<CacheKey>> {
        let mut keys: Vec<CacheKey> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Store with one JSON file per entry, shareable between worker processes
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> HarborResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| HarborError::io(format!("creating cache store {}", dir.display()), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let digest = Sha256::digest(key.as_str().as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    /// Paths of all entry files, readable or not
    async fn entry_files(&self) -> HarborResult<Vec<PathBuf>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| HarborError::store(format!("listing {}: {}", self.dir.display(), e)))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HarborError::store(format!("listing {}: {}", self.dir.display(), e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    async fn read_entry(path: &Path) -> HarborResult<Option<CacheEntry>> {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HarborError::store(format!(
                    "reading {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &CacheKey) -> HarborResult<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let entry = Self::read_entry(&path).await?;

        // A digest collision would hand back another key's response
        Ok(entry.filter(|e| &e.key == key))
    }

    async fn put(&self, entry: CacheEntry) -> HarborResult<()> {
        let path = self.entry_path(&entry.key);
        let content = serde_json::to_vec(&entry)?;

        // Write then rename so readers never see a partial entry
        let tmp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, content)
            .await
            .map_err(|e| HarborError::store(format!("writing {}: {}", tmp.display(), e)))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(HarborError::store(format!(
                "replacing {}: {}",
                path.display(),
                e
            )));
        }

        debug!("Stored {} in {}", entry.key, path.display());
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> HarborResult<bool> {
        let path = self.entry_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HarborError::store(format!(
                "removing {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn keys(&self) -> HarborResult<Vec<CacheKey>> {
        let mut keys = Vec::new();
        for path in self.entry_files().await? {
            match Self::read_entry(&path).await {
                Ok(Some(cached)) => keys.push(cached.key),
                // Removed by another worker between listing and reading
                Ok(None) => {}
                Err(e) => debug!("Skipping unreadable cache entry {}: {}", path.display(), e),
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn purge_unreadable(&self) -> HarborResult<Purged> {
        let mut purged = Purged::default();
        for path in self.entry_files().await? {
            let Err(e) = Self::read_entry(&path).await else {
                continue;
            };

            match fs::remove_file(&path).await {
                Ok(()) => {
                    warn!("Removed unreadable cache entry {}: {}", path.display(), e);
                    purged.removed += 1;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!("Failed to remove unreadable cache entry {}: {}", path.display(), err);
                    purged.failed += 1;
                }
            }
        }
        Ok(purged)
    }
}
