//! Durable, TTL-aware key → JSON store for extraction results.
//!
//! Each entry is two files in the cache directory:
//!
//! ```text
//! {key}.json       payload, e.g. {"content": "...", "page": 3}
//! {key}.meta.json  {"created": "2026-10-18T09:00:00Z", "key": "{key}"}
//! ```
//!
//! Expiry is lazy: [`ContentCache::get`] compares `created` against the TTL
//! and deletes stale entries on the spot. There is no background sweeper.
//!
//! Writers (`set`, `delete`, `clear`) are serialised by one async mutex.
//! Readers take no lock: every file is written to a `*.tmp` sibling and then
//! renamed into place, so a reader sees either the old entry or the new one,
//! never a torn write. The payload rename is the commit point.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A cache failure. Distinct from a miss, which is `Ok(None)`.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem read, write, rename or delete failed.
    #[error("Cache I/O failed on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The payload could not be serialised or parsed.
    #[error("Cache entry '{key}' could not be (de)serialised: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The metadata record is unreadable.
    #[error("Cache entry '{key}' has corrupt metadata: {detail}")]
    Corrupt { key: String, detail: String },

    /// Keys become file names, so separators and `..` are refused.
    #[error("Invalid cache key '{key}'")]
    InvalidKey { key: String },
}

/// Payload stored for one extracted page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPage {
    pub content: String,
    pub page: usize,
}

/// Sibling metadata record used for TTL checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub created: DateTime<Utc>,
    pub key: String,
}

/// File-backed content cache. Share it between pipelines via `Arc`.
#[derive(Debug)]
pub struct ContentCache {
    dir: PathBuf,
    ttl: Option<Duration>,
    write_lock: Mutex<()>,
}

impl ContentCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, ttl: Option<Duration>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;
        debug!("Opened content cache at {} (ttl={:?})", dir.display(), ttl);
        Ok(Self {
            dir,
            ttl,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Read the entry for `key`, or `None` if absent or expired.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.get_at(key, Utc::now()).await
    }

    /// Like [`get`](Self::get), evaluating expiry as of `now`.
    pub async fn get_at<T: DeserializeOwned>(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<T>, CacheError> {
        validate_key(key)?;

        if let Some(ttl) = self.ttl {
            if let Some(meta) = self.read_meta(key).await? {
                if is_expired(meta.created, now, ttl) {
                    debug!("Cache entry '{}' expired (created {})", key, meta.created);
                    self.delete(key).await?;
                    return Ok(None);
                }
            }
        }

        let path = self.data_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };

        let value = serde_json::from_slice(&bytes).map_err(|e| CacheError::Serialize {
            key: key.to_string(),
            source: e,
        })?;
        Ok(Some(value))
    }

    /// Store `payload` under `key`, replacing any previous entry wholesale.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, payload: &T) -> Result<(), CacheError> {
        validate_key(key)?;

        let data = serde_json::to_vec_pretty(payload).map_err(|e| CacheError::Serialize {
            key: key.to_string(),
            source: e,
        })?;
        let meta = CacheMeta {
            created: Utc::now(),
            key: key.to_string(),
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta).map_err(|e| CacheError::Serialize {
            key: key.to_string(),
            source: e,
        })?;

        let _guard = self.write_lock.lock().await;
        write_atomic(&self.meta_path(key), &meta_bytes).await?;
        write_atomic(&self.data_path(key), &data).await?;
        debug!("Cached '{}' ({} bytes)", key, data.len());
        Ok(())
    }

    /// Remove the entry for `key`. Removing an absent entry is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        validate_key(key)?;
        let _guard = self.write_lock.lock().await;
        remove_if_exists(&self.data_path(key)).await?;
        remove_if_exists(&self.meta_path(key)).await?;
        Ok(())
    }

    /// Remove every entry in the cache directory.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0usize;
        for path in self.entry_files().await? {
            remove_if_exists(&path).await?;
            removed += 1;
        }
        debug!("Cleared {} cache files from {}", removed, self.dir.display());
        Ok(())
    }

    /// Total size in bytes of all cache files.
    pub async fn size_bytes(&self) -> Result<u64, CacheError> {
        let mut total = 0u64;
        for path in self.entry_files().await? {
            match tokio::fs::metadata(&path).await {
                Ok(m) => total += m.len(),
                // Removed by a concurrent writer since listing.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::Io { path, source: e }),
            }
        }
        Ok(total)
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn data_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.meta.json"))
    }

    async fn read_meta(&self, key: &str) -> Result<Option<CacheMeta>, CacheError> {
        let path = self.meta_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Corrupt {
                key: key.to_string(),
                detail: e.to_string(),
            })
    }

    /// Every `*.json` (and stray `*.json.tmp`) file in the cache directory.
    async fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let io_err = |e| CacheError::Io {
            path: self.dir.clone(),
            source: e,
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".json") || name.ends_with(".json.tmp") {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
        return Err(CacheError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

fn is_expired(created: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now.signed_duration_since(created) > ttl,
        // A TTL too large for chrono never elapses.
        Err(_) => false,
    }
}

/// Write to `{path}.tmp`, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
            warn!("Failed to remove {}: {}", tmp.display(), cleanup);
        }
        return Err(CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<(), CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
