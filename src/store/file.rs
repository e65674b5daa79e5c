//! Last-resort tier: one self-describing JSON document per cache key.
//!
//! Files are named by the BLAKE3 digest of the key's canonical encoding. Each
//! document carries a schema version and the full key so entries written by
//! an incompatible version, or colliding names, are discarded rather than
//! misread.

use crate::core::{CacheKey, Entry, Tier, TierError, TierStats, TierStatus, TierStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub const SCHEMA_VERSION: u32 = 2;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Serialize, Deserialize)]
struct FileDocument {
    schema_version: u32,
    key: String,
    written_at: DateTime<Utc>,
    ttl: Duration,
    entry: Entry,
}

/// Only the header is decoded first so foreign documents are rejected cheaply.
#[derive(Deserialize)]
struct FileHeader {
    schema_version: u32,
    key: String,
}

impl FileDocument {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        // A TTL past the representable range never expires
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.written_at.checked_add_signed(ttl))
            .is_some_and(|expires_at| expires_at <= now)
    }
}

pub struct FileTier {
    dir: PathBuf,
    ttl: Duration,
    timeout: Duration,
    enabled: bool,
}

impl FileTier {
    pub fn new(dir: &Path, ttl: Duration, timeout: Duration) -> Self {
        Self {
            dir: dir.to_path_buf(),
            ttl,
            timeout,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            ttl: Duration::ZERO,
            timeout: Duration::from_millis(1),
            enabled: false,
        }
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.digest()))
    }

    async fn remove_file(path: &Path) -> Result<(), TierError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_document(path: &Path) -> Result<Option<FileDocument>, TierError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let header: FileHeader = match serde_json::from_slice(&bytes) {
            Ok(header) => header,
            Err(e) => {
                debug!("Discarding unreadable cache file {}: {}", path.display(), e);
                Self::remove_file(path).await?;
                return Ok(None);
            }
        };
        if header.schema_version != SCHEMA_VERSION {
            debug!(
                "Discarding cache file {} with schema version {}",
                path.display(),
                header.schema_version
            );
            Self::remove_file(path).await?;
            return Ok(None);
        }
        match serde_json::from_slice::<FileDocument>(&bytes) {
            Ok(document) => Ok(Some(document)),
            Err(e) => {
                debug!("Discarding corrupt cache file {} ({}): {}", path.display(), header.key, e);
                Self::remove_file(path).await?;
                Ok(None)
            }
        }
    }

    /// Every unexpired entry on disk, used to warm faster tiers at startup.
    pub async fn load_all(&self) -> Result<Vec<Entry>, TierError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let now = Utc::now();
        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_document(&path).await {
                Ok(Some(document)) if !document.is_expired(now) => entries.push(document.entry),
                Ok(_) => {}
                Err(e) => warn!("Skipping cache file {}: {}", path.display(), e),
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl TierStore for FileTier {
    fn tier(&self) -> Tier {
        Tier::File
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Entry>, TierError> {
        if !self.enabled {
            return Ok(None);
        }
        let path = self.path_for(key);
        let Some(document) = Self::read_document(&path).await? else {
            debug!("File MISS for key: {}", key);
            return Ok(None);
        };
        if document.key != key.encode() {
            debug!("File key mismatch at {}, ignoring", path.display());
            return Ok(None);
        }
        if document.is_expired(Utc::now()) {
            debug!("File entry expired for key: {}", key);
            Self::remove_file(&path).await?;
            return Ok(None);
        }
        debug!("File HIT for key: {}", key);
        Ok(Some(document.entry))
    }

    async fn put(&self, key: &CacheKey, entry: &Entry, ttl: Duration) -> Result<(), TierError> {
        if !self.enabled {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let document = FileDocument {
            schema_version: SCHEMA_VERSION,
            key: key.encode(),
            written_at: Utc::now(),
            ttl,
            entry: entry.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        // Write then rename so readers never observe a partial document
        let path = self.path_for(key);
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let staging = path.with_extension(format!("json.{}-{seq}.tmp", std::process::id()));
        tokio::fs::write(&staging, bytes).await?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        debug!("File PUT for key: {}", key);
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<(), TierError> {
        if !self.enabled {
            return Ok(());
        }
        Self::remove_file(&self.path_for(key)).await?;
        debug!("File REMOVE for key: {}", key);
        Ok(())
    }

    async fn stats(&self) -> TierStats {
        if !self.enabled {
            return TierStats {
                tier: Tier::File,
                status: TierStatus::Disabled,
                entries: None,
            };
        }
        let count = async {
            let mut dir = match tokio::fs::read_dir(&self.dir).await {
                Ok(dir) => dir,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
                Err(e) => return Err(e),
            };
            let mut count = 0;
            while let Some(item) = dir.next_entry().await? {
                if item.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    count += 1;
                }
            }
            Ok::<usize, std::io::Error>(count)
        };
        match count.await {
            Ok(entries) => TierStats {
                tier: Tier::File,
                status: TierStatus::Healthy,
                entries: Some(entries),
            },
            Err(e) => TierStats {
                tier: Tier::File,
                status: TierStatus::Error(e.to_string()),
                entries: None,
            },
        }
    }
}
