use super::bars::BarSeries;
use super::instrument::InstrumentList;
use super::key::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a cache entry holds, tagged so stored documents stay self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Bars(BarSeries),
    Instruments(InstrumentList),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Bars(series) => series.len(),
            Payload::Instruments(list) => list.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bars(&self) -> Option<&BarSeries> {
        match self {
            Payload::Bars(series) => Some(series),
            Payload::Instruments(_) => None,
        }
    }

    pub fn into_bars(self) -> Option<BarSeries> {
        match self {
            Payload::Bars(series) => Some(series),
            Payload::Instruments(_) => None,
        }
    }

    pub fn into_instruments(self) -> Option<InstrumentList> {
        match self {
            Payload::Instruments(list) => Some(list),
            Payload::Bars(_) => None,
        }
    }
}

impl From<BarSeries> for Payload {
    fn from(series: BarSeries) -> Self {
        Payload::Bars(series)
    }
}

impl From<InstrumentList> for Payload {
    fn from(list: InstrumentList) -> Self {
        Payload::Instruments(list)
    }
}

/// A cached payload. Never mutated; a refresh replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: CacheKey,
    pub payload: Payload,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
    pub source_provider: String,
}

impl Entry {
    pub fn new(
        key: CacheKey,
        payload: impl Into<Payload>,
        ttl: Duration,
        source_provider: &str,
    ) -> Self {
        Self {
            key,
            payload: payload.into(),
            fetched_at: Utc::now(),
            ttl,
            source_provider: source_provider.to_string(),
        }
    }

    /// Copy of this entry carrying a tier-specific TTL.
    pub fn with_ttl(&self, ttl: Duration) -> Self {
        Self {
            ttl,
            ..self.clone()
        }
    }
}
