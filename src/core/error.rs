//! Error taxonomy for providers, tiers and retrieval

use std::time::Duration;
use thiserror::Error;

/// Why a single provider adapter call did not yield data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchOutcome {
    #[error("no data available")]
    NoData,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchOutcome {
    /// Transient failures are retried against the same adapter.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchOutcome::NetworkError(_) | FetchOutcome::RateLimited(_)
        )
    }
}

/// Tier-local failure. Always absorbed by the cache manager.
#[derive(Debug, Error)]
pub enum TierError {
    #[error("tier unavailable: {0}")]
    Unavailable(String),

    #[error("tier timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] fjall::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("no usable rows in {provider} payload")]
    Empty { provider: String },

    #[error("invalid record from {provider}: {reason}")]
    InvalidRecord { provider: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("unsupported key version: '{0}'")]
    UnsupportedVersion(String),

    #[error("missing key field: {0}")]
    MissingField(&'static str),

    #[error("invalid value '{value}' for key field {field}")]
    InvalidField { field: &'static str, value: String },

    #[error("malformed key segment: '{0}'")]
    Malformed(String),
}

/// Caller-facing classification of a failed retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Data does not exist upstream; retrying will not help.
    NoData,
    /// Sources are degraded; retry later.
    TemporarilyUnavailable,
    /// Upstream returned data that violates bar invariants.
    Malformed,
    /// The caller's deadline elapsed.
    DeadlineExceeded,
    /// The request cannot be served by this configuration.
    Unsupported,
}

/// Terminal error of a retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalError {
    #[error("all providers exhausted for {market}:{symbol} ({})", exhaustion_reason(.all_no_data))]
    AllProvidersExhausted {
        market: String,
        symbol: String,
        all_no_data: bool,
        attempts: Vec<String>,
    },

    #[error("malformed data from {provider}: {reason}")]
    MalformedData { provider: String, reason: String },

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("no providers configured for market {0}")]
    UnsupportedMarket(String),

    #[error("no configured provider lists instruments for market {0}")]
    UnsupportedListing(String),

    #[error("fetch task failed: {0}")]
    Internal(String),
}

fn exhaustion_reason(all_no_data: &bool) -> &'static str {
    if *all_no_data {
        "no data exists"
    } else {
        "sources unavailable"
    }
}

impl RetrievalError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RetrievalError::AllProvidersExhausted {
                all_no_data: true, ..
            } => FailureKind::NoData,
            RetrievalError::AllProvidersExhausted { .. } | RetrievalError::Internal(_) => {
                FailureKind::TemporarilyUnavailable
            }
            RetrievalError::MalformedData { .. } => FailureKind::Malformed,
            RetrievalError::DeadlineExceeded(_) => FailureKind::DeadlineExceeded,
            RetrievalError::UnsupportedMarket(_) | RetrievalError::UnsupportedListing(_) => {
                FailureKind::Unsupported
            }
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.kind() == FailureKind::NoData
    }

    /// Whether a later retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::TemporarilyUnavailable | FailureKind::DeadlineExceeded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_outcomes() {
        assert!(FetchOutcome::NetworkError("reset".into()).is_transient());
        assert!(FetchOutcome::RateLimited("429".into()).is_transient());
        assert!(!FetchOutcome::NoData.is_transient());
        assert!(!FetchOutcome::AuthError("bad token".into()).is_transient());
        assert!(!FetchOutcome::Malformed("eof".into()).is_transient());
    }

    #[test]
    fn test_retrieval_error_classification() {
        let no_data = RetrievalError::AllProvidersExhausted {
            market: "CN".into(),
            symbol: "000001".into(),
            all_no_data: true,
            attempts: vec![],
        };
        assert_eq!(no_data.kind(), FailureKind::NoData);
        assert!(no_data.is_no_data());
        assert!(!no_data.is_retryable());
        assert!(no_data.to_string().contains("no data exists"));

        let degraded = RetrievalError::AllProvidersExhausted {
            market: "CN".into(),
            symbol: "000001".into(),
            all_no_data: false,
            attempts: vec![],
        };
        assert_eq!(degraded.kind(), FailureKind::TemporarilyUnavailable);
        assert!(degraded.is_retryable());

        let malformed = RetrievalError::MalformedData {
            provider: "eastmoney".into(),
            reason: "low > high".into(),
        };
        assert_eq!(malformed.kind(), FailureKind::Malformed);
        assert!(!malformed.is_retryable());
    }
}
