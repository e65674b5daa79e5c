//! Tier store abstraction

use super::entry::Entry;
use super::error::TierError;
use super::key::CacheKey;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Display;
use std::time::Duration;

/// Cache tiers ordered by rank; lower rank is faster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Tier {
    Volatile = 1,
    Structured = 2,
    File = 3,
}

impl Tier {
    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Tier::Volatile => "volatile",
                Tier::Structured => "structured",
                Tier::File => "file",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TierStatus {
    Healthy,
    Disabled,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub tier: Tier,
    pub status: TierStatus,
    pub entries: Option<usize>,
}

/// Uniform capability over one cache backend.
///
/// Errors returned here are tier-local; the cache manager logs and absorbs
/// them, treating a failed read as a miss.
#[async_trait]
pub trait TierStore: Send + Sync {
    fn tier(&self) -> Tier;

    /// TTL applied to entries written to this tier.
    fn ttl(&self) -> Duration;

    /// Upper bound for a single call against this tier.
    fn timeout(&self) -> Duration;

    async fn get(&self, key: &CacheKey) -> Result<Option<Entry>, TierError>;

    async fn put(&self, key: &CacheKey, entry: &Entry, ttl: Duration) -> Result<(), TierError>;

    async fn invalidate(&self, key: &CacheKey) -> Result<(), TierError>;

    async fn stats(&self) -> TierStats;
}
