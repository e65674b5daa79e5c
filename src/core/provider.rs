//! Provider adapter abstraction and raw payload types

use super::bars::{DateRange, Market, Resolution};
use super::error::FetchOutcome;
use super::instrument::Instrument;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One upstream row before normalization. Dates are kept as the provider's
/// string form, prices may be missing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawBar {
    pub date: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub adjusted_close: Option<f64>,
    pub amount: Option<f64>,
    pub pct_change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    pub provider: String,
    pub records: Vec<RawBar>,
}

/// Instruments as returned by the first adapter that could list them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawListing {
    pub provider: String,
    pub instruments: Vec<Instrument>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub market: Market,
    pub symbol: String,
    pub range: DateRange,
    pub resolution: Resolution,
}

/// A single upstream data source.
///
/// Adapters never cache; the cache manager owns all caching.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier used in priority lists and health tracking.
    fn id(&self) -> &str;

    fn markets(&self) -> &'static [Market];

    fn supports(&self, market: Market) -> bool {
        self.markets().contains(&market)
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<RawSeries, FetchOutcome>;

    /// Whether this adapter can enumerate the instruments of `market`.
    fn lists_instruments(&self, _market: Market) -> bool {
        false
    }

    async fn list_instruments(&self, _market: Market) -> Result<Vec<Instrument>, FetchOutcome> {
        Err(FetchOutcome::NoData)
    }
}
