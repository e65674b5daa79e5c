//! Domain types and the seams between layers

pub mod bars;
pub mod config;
pub mod entry;
pub mod error;
pub mod instrument;
pub mod key;
pub mod log;
pub mod normalize;
pub mod provider;
pub mod tier;

// Re-export main types for cleaner imports
pub use bars::{Bar, BarSeries, DateRange, Market, Resolution};
pub use entry::{Entry, Payload};
pub use error::{FailureKind, FetchOutcome, NormalizationError, RetrievalError, TierError};
pub use instrument::{Instrument, InstrumentList};
pub use key::{CacheKey, DataKind};
pub use normalize::{Normalizer, StandardNormalizer};
pub use provider::{FetchRequest, ProviderAdapter, RawBar, RawListing, RawSeries};
pub use tier::{Tier, TierStats, TierStatus, TierStore};
