use crate::core::{CacheKey, Entry, Tier, TierError, TierStats, TierStatus, TierStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct CacheValue {
    entry: Entry,
    /// `None` when the TTL overflows the clock, i.e. never expires.
    expires_at: Option<Instant>,
}

impl CacheValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process volatile tier. Expiry is enforced by the store itself.
///
/// A disabled tier behaves like an unreachable backend: reads miss and
/// writes are dropped.
pub struct VolatileTier {
    inner: Option<Mutex<HashMap<CacheKey, CacheValue>>>,
    ttl: Duration,
    timeout: Duration,
    max_entries: usize,
}

impl VolatileTier {
    pub fn new(ttl: Duration, timeout: Duration, max_entries: usize) -> Self {
        Self {
            inner: Some(Mutex::new(HashMap::new())),
            ttl,
            timeout,
            max_entries: max_entries.max(1),
        }
    }

    pub fn disabled() -> Self {
        Self {
            inner: None,
            ttl: Duration::ZERO,
            timeout: Duration::from_millis(1),
            max_entries: 1,
        }
    }
}

#[async_trait]
impl TierStore for VolatileTier {
    fn tier(&self) -> Tier {
        Tier::Volatile
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Entry>, TierError> {
        let Some(inner) = &self.inner else {
            return Ok(None);
        };
        let mut cache = inner.lock().await;
        if let Some(value) = cache.get(key) {
            if !value.is_live(Instant::now()) {
                debug!("Volatile entry expired for key: {}", key);
                cache.remove(key);
                return Ok(None);
            }
            debug!("Volatile HIT for key: {}", key);
            return Ok(Some(value.entry.clone()));
        }
        debug!("Volatile MISS for key: {}", key);
        Ok(None)
    }

    async fn put(&self, key: &CacheKey, entry: &Entry, ttl: Duration) -> Result<(), TierError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        let now = Instant::now();
        let mut cache = inner.lock().await;
        if cache.len() >= self.max_entries && !cache.contains_key(key) {
            cache.retain(|_, v| v.is_live(now));
            if cache.len() >= self.max_entries {
                let soonest = cache
                    .iter()
                    .min_by_key(|(_, v)| (v.expires_at.is_none(), v.expires_at))
                    .map(|(k, _)| k.clone());
                if let Some(evicted) = soonest {
                    debug!("Volatile EVICT for key: {}", evicted);
                    cache.remove(&evicted);
                }
            }
        }
        cache.insert(
            key.clone(),
            CacheValue {
                entry: entry.clone(),
                expires_at: now.checked_add(ttl),
            },
        );
        debug!("Volatile PUT for key: {}", key);
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<(), TierError> {
        if let Some(inner) = &self.inner {
            inner.lock().await.remove(key);
            debug!("Volatile REMOVE for key: {}", key);
        }
        Ok(())
    }

    async fn stats(&self) -> TierStats {
        match &self.inner {
            Some(inner) => {
                let now = Instant::now();
                let live = inner
                    .lock()
                    .await
                    .values()
                    .filter(|v| v.is_live(now))
                    .count();
                TierStats {
                    tier: Tier::Volatile,
                    status: TierStatus::Healthy,
                    entries: Some(live),
                }
            }
            None => TierStats {
                tier: Tier::Volatile,
                status: TierStatus::Disabled,
                entries: None,
            },
        }
    }
}
