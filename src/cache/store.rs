//! Disk-backed response store.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

use crate::cache::key::CacheKey;

/// Cache failures. Never surfaced to clients, only logged.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create cache directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read cache entry {key}: {source}")]
    Read {
        key: CacheKey,
        #[source]
        source: io::Error,
    },

    #[error("failed to write cache entry {key}: {source}")]
    Write {
        key: CacheKey,
        #[source]
        source: io::Error,
    },
}

/// One file per key under a single directory.
///
/// Writes go to a uniquely named temp file which is then renamed over the
/// entry, so readers see either the previous payload or the new one in full.
/// Writers to the same key are additionally serialized.
#[derive(Debug)]
pub struct CacheStore {
    directory: PathBuf,
    write_locks: DashMap<CacheKey, Arc<Mutex<()>>>,
}

impl CacheStore {
    /// Open the store, creating the directory if it does not exist yet.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let directory = directory.into();

        if !fs::try_exists(&directory).await.unwrap_or(false) {
            fs::create_dir_all(&directory)
                .await
                .map_err(|source| CacheError::CreateDir {
                    path: directory.clone(),
                    source,
                })?;
            tracing::info!(directory = ?directory, "Cache directory created");
        }

        Ok(Self {
            directory,
            write_locks: DashMap::new(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File holding the entry for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(key.as_str())
    }

    /// Fetch the stored payload, if any.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        match fs::read(self.path_for(key)).await {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheError::Read {
                key: key.clone(),
                source,
            }),
        }
    }

    /// Replace the entry for `key` with `payload`.
    pub async fn store(&self, key: &CacheKey, payload: &[u8]) -> Result<(), CacheError> {
        let lock = self.write_locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.replace(key, payload).await
        };

        drop(lock);
        self.write_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);

        result.map_err(|source| CacheError::Write {
            key: key.clone(),
            source,
        })
    }

    async fn replace(&self, key: &CacheKey, payload: &[u8]) -> io::Result<()> {
        let temp = self
            .directory
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&temp, payload).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp, self.path_for(key)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(())
    }
}
