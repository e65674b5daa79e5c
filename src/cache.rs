//! Read-through, write-through orchestration across the cache tiers.
//!
//! Tier failures never leave this module: a tier that errors or exceeds its
//! timeout counts as a miss on reads and is skipped on writes.

use crate::core::config::WritePolicy;
use crate::core::{CacheKey, Entry, Tier, TierError, TierStats, TierStore};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct CacheManager {
    tiers: Vec<Arc<dyn TierStore>>,
}

async fn bounded<T>(
    tier: &dyn TierStore,
    operation: impl Future<Output = Result<T, TierError>>,
) -> Result<T, TierError> {
    match tokio::time::timeout(tier.timeout(), operation).await {
        Ok(result) => result,
        Err(_) => Err(TierError::Timeout(tier.timeout())),
    }
}

async fn write_tier(tier: Arc<dyn TierStore>, entry: Entry) -> Result<(), TierError> {
    let ttl = tier.ttl();
    let copy = entry.with_ttl(ttl);
    bounded(tier.as_ref(), tier.put(&entry.key, &copy, ttl)).await
}

fn log_write(tier: Tier, key: &CacheKey, result: Result<(), TierError>) {
    if let Err(e) = result {
        warn!(%tier, %key, error = %e, "Cache write failed");
    }
}

impl CacheManager {
    pub fn new(mut tiers: Vec<Arc<dyn TierStore>>) -> Self {
        tiers.sort_by_key(|t| t.tier());
        Self { tiers }
    }

    pub fn tiers(&self) -> &[Arc<dyn TierStore>] {
        &self.tiers
    }

    /// Queries every tier concurrently and returns the hit from the fastest
    /// one. Faster tiers that missed are backfilled before returning.
    pub async fn get(&self, key: &CacheKey) -> Option<Entry> {
        let reads = join_all(
            self.tiers
                .iter()
                .map(|tier| bounded(tier.as_ref(), tier.get(key))),
        )
        .await;

        let mut hit = None;
        for (index, result) in reads.into_iter().enumerate() {
            match result {
                Ok(Some(entry)) => {
                    hit = Some((index, entry));
                    break;
                }
                Ok(None) => {}
                Err(e) => debug!(tier = %self.tiers[index].tier(), %key, error = %e, "Tier read failed, treating as miss"),
            }
        }

        let Some((index, entry)) = hit else {
            debug!(%key, "Cache MISS on all tiers");
            return None;
        };
        debug!(tier = %self.tiers[index].tier(), %key, "Cache HIT");

        if index > 0 {
            let backfills = self.tiers[..index]
                .iter()
                .map(|tier| write_tier(Arc::clone(tier), entry.clone()));
            for (tier, result) in self.tiers[..index].iter().zip(join_all(backfills).await) {
                log_write(tier.tier(), key, result);
            }
        }
        Some(entry)
    }

    /// Writes to every tier concurrently and waits for all of them.
    pub async fn put(&self, entry: &Entry) {
        let writes = self
            .tiers
            .iter()
            .map(|tier| write_tier(Arc::clone(tier), entry.clone()));
        for (tier, result) in self.tiers.iter().zip(join_all(writes).await) {
            log_write(tier.tier(), &entry.key, result);
        }
    }

    /// Writes according to `policy`; tiers not awaited complete in the
    /// background.
    ///
    /// Under [`WritePolicy::FullyAsync`] the handle of the fastest tier's
    /// write is returned, so callers can tell when the entry becomes
    /// readable. Under [`WritePolicy::FastestTierSync`] that write has
    /// already completed and `None` is returned.
    pub async fn put_with_policy(&self, entry: &Entry, policy: WritePolicy) -> Option<JoinHandle<()>> {
        let (awaited, detached) = match policy {
            WritePolicy::FastestTierSync => (self.tiers.first().cloned(), self.tiers.iter().skip(1)),
            WritePolicy::FullyAsync => (None, self.tiers.iter().skip(0)),
        };

        let mut handles = detached.map(|tier| {
            let tier = Arc::clone(tier);
            let entry = entry.clone();
            tokio::spawn(async move {
                let key = entry.key.clone();
                let rank = tier.tier();
                log_write(rank, &key, write_tier(tier, entry).await);
            })
        });
        let fastest = match policy {
            WritePolicy::FullyAsync => handles.next(),
            WritePolicy::FastestTierSync => None,
        };
        handles.for_each(drop);

        if let Some(tier) = awaited {
            let rank = tier.tier();
            log_write(rank, &entry.key, write_tier(tier, entry.clone()).await);
        }
        fastest
    }

    /// Removes `key` from every tier. Failures are logged, not retried.
    pub async fn invalidate(&self, key: &CacheKey) {
        let removals = self
            .tiers
            .iter()
            .map(|tier| bounded(tier.as_ref(), tier.invalidate(key)));
        for (tier, result) in self.tiers.iter().zip(join_all(removals).await) {
            if let Err(e) = result {
                warn!(tier = %tier.tier(), %key, error = %e, "Cache invalidation failed");
            }
        }
    }

    pub async fn stats(&self) -> Vec<TierStats> {
        join_all(self.tiers.iter().map(|tier| tier.stats())).await
    }

    /// Loads `entries` into every tier faster than `source`.
    pub async fn warm(&self, entries: Vec<Entry>, source: Tier) -> usize {
        let targets: Vec<_> = self
            .tiers
            .iter()
            .filter(|tier| tier.tier() < source)
            .cloned()
            .collect();
        if targets.is_empty() {
            return 0;
        }
        let mut loaded = 0;
        for entry in entries {
            let writes = targets
                .iter()
                .map(|tier| write_tier(Arc::clone(tier), entry.clone()));
            let mut any = false;
            for (tier, result) in targets.iter().zip(join_all(writes).await) {
                any |= result.is_ok();
                log_write(tier.tier(), &entry.key, result);
            }
            if any {
                loaded += 1;
            }
        }
        debug!(loaded, %source, "Warmed faster tiers");
        loaded
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingTier;
    use super::*;
    use crate::store::test_support::{entry_for, key_for};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn manager(tiers: &[Arc<RecordingTier>]) -> CacheManager {
        CacheManager::new(
            tiers
                .iter()
                .map(|t| Arc::clone(t) as Arc<dyn TierStore>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_file_hit_backfills_faster_tiers() {
        let volatile = Arc::new(RecordingTier::new(Tier::Volatile));
        let structured = Arc::new(RecordingTier::new(Tier::Structured));
        let file = Arc::new(RecordingTier::new(Tier::File));
        // Deliberately unordered
        let cache = manager(&[file.clone(), volatile.clone(), structured.clone()]);
        let key = key_for("000001");
        file.insert(entry_for(&key));

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.payload, entry_for(&key).payload);
        assert!(volatile.contains(&key));
        assert!(structured.contains(&key));

        // The backfilled copy carries the faster tier's TTL
        let copy = volatile.entries.lock().unwrap().get(&key).cloned().unwrap();
        assert_eq!(copy.ttl, Duration::from_secs(60));
        assert_eq!(copy.fetched_at, entry_for(&key).fetched_at);
    }

    #[tokio::test]
    async fn test_fastest_hit_wins_without_backfill() {
        let volatile = Arc::new(RecordingTier::new(Tier::Volatile));
        let structured = Arc::new(RecordingTier::new(Tier::Structured));
        let cache = manager(&[volatile.clone(), structured.clone()]);
        let key = key_for("000001");
        volatile.insert(entry_for(&key));

        assert!(cache.get(&key).await.is_some());
        assert_eq!(structured.puts.load(Ordering::SeqCst), 0);
        assert!(!structured.contains(&key));
    }

    #[tokio::test]
    async fn test_unreachable_tiers_are_misses() {
        let volatile = Arc::new(RecordingTier::unreachable(Tier::Volatile));
        let structured = Arc::new(RecordingTier::unreachable(Tier::Structured));
        let file = Arc::new(RecordingTier::new(Tier::File));
        let cache = manager(&[volatile.clone(), structured.clone(), file.clone()]);
        let key = key_for("000001");

        assert!(cache.get(&key).await.is_none());

        file.insert(entry_for(&key));
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_put_survives_tier_failures() {
        let volatile = Arc::new(RecordingTier::unreachable(Tier::Volatile));
        let structured = Arc::new(RecordingTier::unreachable(Tier::Structured));
        let file = Arc::new(RecordingTier::new(Tier::File));
        let cache = manager(&[volatile.clone(), structured.clone(), file.clone()]);
        let key = key_for("000001");

        cache.put(&entry_for(&key)).await;
        assert_eq!(volatile.puts.load(Ordering::SeqCst), 1);
        assert_eq!(structured.puts.load(Ordering::SeqCst), 1);
        assert!(file.contains(&key));
    }

    #[tokio::test]
    async fn test_stalled_tier_times_out_as_miss() {
        let volatile = Arc::new(RecordingTier::stalled(Tier::Volatile, Duration::from_secs(5)));
        let file = Arc::new(RecordingTier::new(Tier::File));
        let cache = manager(&[volatile.clone(), file.clone()]);
        let key = key_for("000001");
        file.insert(entry_for(&key));

        let started = std::time::Instant::now();
        assert!(cache.get(&key).await.is_some());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_fastest_tier_sync_policy() {
        let volatile = Arc::new(RecordingTier::new(Tier::Volatile));
        let file = Arc::new(RecordingTier::stalled(Tier::File, Duration::from_millis(20)));
        let cache = manager(&[volatile.clone(), file.clone()]);
        let key = key_for("000001");

        let pending = cache
            .put_with_policy(&entry_for(&key), WritePolicy::FastestTierSync)
            .await;
        assert!(pending.is_none());
        assert!(volatile.contains(&key));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(file.contains(&key));
    }

    #[tokio::test]
    async fn test_fully_async_policy_hands_back_fastest_write() {
        let volatile = Arc::new(RecordingTier::slow_writes(Tier::Volatile, Duration::from_millis(20)));
        let file = Arc::new(RecordingTier::new(Tier::File));
        let cache = manager(&[volatile.clone(), file.clone()]);
        let key = key_for("000001");

        let pending = cache
            .put_with_policy(&entry_for(&key), WritePolicy::FullyAsync)
            .await
            .unwrap();
        assert!(!volatile.contains(&key));

        pending.await.unwrap();
        assert!(volatile.contains(&key));
    }

    #[tokio::test]
    async fn test_invalidate_reaches_all_tiers() {
        let volatile = Arc::new(RecordingTier::new(Tier::Volatile));
        let structured = Arc::new(RecordingTier::unreachable(Tier::Structured));
        let file = Arc::new(RecordingTier::new(Tier::File));
        let cache = manager(&[volatile.clone(), structured.clone(), file.clone()]);
        let key = key_for("000001");
        volatile.insert(entry_for(&key));
        file.insert(entry_for(&key));

        cache.invalidate(&key).await;
        assert!(!volatile.contains(&key));
        assert!(!file.contains(&key));
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_warm_loads_faster_tiers_only() {
        let volatile = Arc::new(RecordingTier::new(Tier::Volatile));
        let file = Arc::new(RecordingTier::new(Tier::File));
        let cache = manager(&[volatile.clone(), file.clone()]);
        let a = key_for("000001");
        let b = key_for("600000");

        let loaded = cache
            .warm(vec![entry_for(&a), entry_for(&b)], Tier::File)
            .await;
        assert_eq!(loaded, 2);
        assert!(volatile.contains(&a));
        assert!(volatile.contains(&b));
        assert_eq!(file.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stats_cover_every_tier() {
        let volatile = Arc::new(RecordingTier::new(Tier::Volatile));
        let structured = Arc::new(RecordingTier::unreachable(Tier::Structured));
        let cache = manager(&[structured.clone(), volatile.clone()]);

        let stats = cache.stats().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].tier, Tier::Volatile);
        assert!(matches!(
            stats[1].status,
            crate::core::TierStatus::Error(_)
        ));
    }
}
