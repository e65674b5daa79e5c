use crate::core::{CacheKey, Entry, Tier, TierError, TierStats, TierStatus, TierStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const PARTITION: &str = "bars";

/// The store has no native expiry, so the write time travels with the value.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    written_at: DateTime<Utc>,
    ttl: Duration,
    entry: Entry,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        // A TTL past the representable range never expires
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.written_at.checked_add_signed(ttl))
            .is_some_and(|expires_at| expires_at <= now)
    }
}

/// Durable tier backed by a fjall keyspace.
pub struct StructuredTier {
    store: Option<(Keyspace, PartitionHandle)>,
    unavailable_reason: Option<String>,
    ttl: Duration,
    timeout: Duration,
}

impl StructuredTier {
    pub fn open(db_path: &Path, ttl: Duration, timeout: Duration) -> Result<Self, TierError> {
        std::fs::create_dir_all(db_path)?;

        let keyspace = fjall::Config::new(db_path).open()?;
        let partition = keyspace.open_partition(PARTITION, PartitionCreateOptions::default())?;
        Ok(Self {
            store: Some((keyspace, partition)),
            unavailable_reason: None,
            ttl,
            timeout,
        })
    }

    /// A tier whose backend could not be reached; every call is a miss.
    pub fn unavailable(reason: impl Into<String>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            store: None,
            unavailable_reason: Some(reason.into()),
            ttl,
            timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    fn partition(&self) -> Result<PartitionHandle, TierError> {
        match &self.store {
            Some((_, partition)) => Ok(partition.clone()),
            None => Err(TierError::Unavailable(
                self.unavailable_reason
                    .clone()
                    .unwrap_or_else(|| "structured store not opened".to_string()),
            )),
        }
    }
}

#[async_trait]
impl TierStore for StructuredTier {
    fn tier(&self) -> Tier {
        Tier::Structured
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Entry>, TierError> {
        let partition = self.partition()?;
        let raw_key = key.encode();
        let found = tokio::task::spawn_blocking(move || -> Result<Option<Entry>, TierError> {
            let Some(value) = partition.get(raw_key.as_bytes())? else {
                return Ok(None);
            };
            let stored: StoredEntry = match serde_json::from_slice(&value) {
                Ok(stored) => stored,
                Err(e) => {
                    debug!("Discarding undecodable structured entry: {}", e);
                    partition.remove(raw_key.as_bytes())?;
                    return Ok(None);
                }
            };
            if stored.is_expired(Utc::now()) {
                partition.remove(raw_key.as_bytes())?;
                return Ok(None);
            }
            Ok(Some(stored.entry))
        })
        .await??;

        if found.is_some() {
            debug!("Structured HIT for key: {}", key);
        } else {
            debug!("Structured MISS for key: {}", key);
        }
        Ok(found)
    }

    async fn put(&self, key: &CacheKey, entry: &Entry, ttl: Duration) -> Result<(), TierError> {
        let partition = self.partition()?;
        let raw_key = key.encode();
        let value = serde_json::to_vec(&StoredEntry {
            written_at: Utc::now(),
            ttl,
            entry: entry.clone(),
        })?;
        tokio::task::spawn_blocking(move || partition.insert(raw_key.as_bytes(), value))
            .await??;
        debug!("Structured PUT for key: {}", key);
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<(), TierError> {
        let partition = self.partition()?;
        let raw_key = key.encode();
        tokio::task::spawn_blocking(move || partition.remove(raw_key.as_bytes())).await??;
        debug!("Structured REMOVE for key: {}", key);
        Ok(())
    }

    async fn stats(&self) -> TierStats {
        let partition = match self.partition() {
            Ok(partition) => partition,
            Err(e) => {
                return TierStats {
                    tier: Tier::Structured,
                    status: TierStatus::Error(e.to_string()),
                    entries: None,
                };
            }
        };
        match tokio::task::spawn_blocking(move || partition.len()).await {
            Ok(Ok(entries)) => TierStats {
                tier: Tier::Structured,
                status: TierStatus::Healthy,
                entries: Some(entries),
            },
            Ok(Err(e)) => TierStats {
                tier: Tier::Structured,
                status: TierStatus::Error(e.to_string()),
                entries: None,
            },
            Err(e) => TierStats {
                tier: Tier::Structured,
                status: TierStatus::Error(e.to_string()),
                entries: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{entry_for, key_for};
    use tempfile::tempdir;
    use tokio::time::sleep;

    fn open(dir: &Path) -> StructuredTier {
        StructuredTier::open(dir, Duration::from_secs(60), Duration::from_millis(250)).unwrap()
    }

    #[tokio::test]
    async fn test_structured_get_put() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path());
        let key = key_for("000001");

        // Initially, cache is empty
        assert!(cache.get(&key).await.unwrap().is_none());

        cache.put(&key, &entry_for(&key), cache.ttl()).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(entry_for(&key)));
        assert_eq!(cache.stats().await.entries, Some(1));
    }

    #[tokio::test]
    async fn test_structured_expired_entry_is_deleted_on_read() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path());
        let key = key_for("000001");

        cache
            .put(&key, &entry_for(&key), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(cache.get(&key).await.unwrap().is_some());

        // Wait for TTL expiration
        sleep(Duration::from_millis(30)).await;
        assert!(cache.get(&key).await.unwrap().is_none());
        assert_eq!(cache.stats().await.entries, Some(0));
    }

    #[tokio::test]
    async fn test_structured_ttl_past_calendar_never_expires() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path());
        let key = key_for("000001");

        // Roughly 300k years, beyond the last representable date
        let ttl = Duration::from_secs(10_000_000_000_000);
        cache.put(&key, &entry_for(&key), ttl).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(entry_for(&key)));
    }

    #[tokio::test]
    async fn test_structured_put_replaces_entry() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path());
        let key = key_for("000001");

        let first = entry_for(&key);
        let mut second = entry_for(&key);
        second.source_provider = "tushare".to_string();

        cache.put(&key, &first, cache.ttl()).await.unwrap();
        cache.put(&key, &second, cache.ttl()).await.unwrap();
        let found = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(found.source_provider, "tushare");
    }

    #[tokio::test]
    async fn test_structured_invalidate() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path());
        let key = key_for("000001");

        cache.put(&key, &entry_for(&key), cache.ttl()).await.unwrap();
        cache.invalidate(&key).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_structured_tier_reports_errors() {
        let cache = StructuredTier::unavailable(
            "connection refused",
            Duration::from_secs(60),
            Duration::from_millis(250),
        );
        let key = key_for("000001");

        assert!(matches!(
            cache.get(&key).await,
            Err(TierError::Unavailable(_))
        ));
        assert!(cache.put(&key, &entry_for(&key), cache.ttl()).await.is_err());
        assert!(matches!(
            cache.stats().await.status,
            TierStatus::Error(reason) if reason.contains("connection refused")
        ));
    }
}
