//! Ordered provider fallback with retry and per-provider circuit breaking.
//!
//! The chain owns the only mutable provider state in the process: a health
//! table keyed by provider id. It is never persisted, so a restart closes
//! every circuit.

use crate::core::config::{AppConfig, CircuitConfig, RetryConfig};
use crate::core::key::ALL_SYMBOLS;
use crate::core::{
    FetchOutcome, FetchRequest, Market, ProviderAdapter, RawListing, RawSeries, RetrievalError,
};
use crate::providers::util::with_retry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderHealth {
    pub consecutive_failures: u32,
    pub circuit_open_until: Option<Instant>,
}

impl ProviderHealth {
    /// Whether calls are refused at `now`. An elapsed window closes the
    /// circuit and clears the failure count.
    fn is_open(&mut self, now: Instant) -> bool {
        match self.circuit_open_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.circuit_open_until = None;
                self.consecutive_failures = 0;
                false
            }
            None => false,
        }
    }
}

pub struct ProviderChain {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    priorities: HashMap<Market, Vec<String>>,
    health: Mutex<HashMap<String, ProviderHealth>>,
    retry: RetryConfig,
    circuit: CircuitConfig,
}

impl ProviderChain {
    pub fn new(
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        priorities: HashMap<Market, Vec<String>>,
        retry: RetryConfig,
        circuit: CircuitConfig,
    ) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.id().to_string(), adapter))
            .collect();
        Self {
            adapters,
            priorities,
            health: Mutex::new(HashMap::new()),
            retry,
            circuit,
        }
    }

    pub fn from_config(config: &AppConfig, adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self::new(
            adapters,
            config.markets.clone(),
            config.retry.clone(),
            config.circuit.clone(),
        )
    }

    /// Configured provider ids for `market` that have an adapter supporting it,
    /// in priority order.
    pub fn providers_for(&self, market: Market) -> Vec<String> {
        self.priorities
            .get(&market)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.adapters
                            .get(id.as_str())
                            .is_some_and(|adapter| adapter.supports(market))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subset of [`Self::providers_for`] able to list instruments.
    pub fn listers_for(&self, market: Market) -> Vec<String> {
        self.providers_for(market)
            .into_iter()
            .filter(|id| {
                self.adapters
                    .get(id.as_str())
                    .is_some_and(|adapter| adapter.lists_instruments(market))
            })
            .collect()
    }

    pub fn health(&self, provider: &str) -> ProviderHealth {
        self.health_table()
            .get(provider)
            .cloned()
            .unwrap_or_default()
    }

    fn health_table(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProviderHealth>> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn circuit_open(&self, provider: &str) -> bool {
        self.health_table()
            .entry(provider.to_string())
            .or_default()
            .is_open(Instant::now())
    }

    fn record_success(&self, provider: &str) {
        let mut table = self.health_table();
        let health = table.entry(provider.to_string()).or_default();
        health.consecutive_failures = 0;
        health.circuit_open_until = None;
    }

    fn record_failure(&self, provider: &str) {
        let mut table = self.health_table();
        let health = table.entry(provider.to_string()).or_default();
        health.consecutive_failures += 1;
        if health.consecutive_failures >= self.circuit.failure_threshold {
            health.circuit_open_until = Some(Instant::now() + self.circuit.cooldown());
            warn!(
                provider,
                failures = health.consecutive_failures,
                cooldown = ?self.circuit.cooldown(),
                "Circuit opened"
            );
        }
    }

    async fn call_with_timeout<T>(
        provider: &str,
        call: impl Future<Output = Result<T, FetchOutcome>>,
        limit: Duration,
    ) -> Result<T, FetchOutcome> {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(FetchOutcome::NetworkError(format!(
                "{provider} timed out after {limit:?}"
            ))),
        }
    }

    /// Tries each adapter for the request's market in priority order and
    /// returns the first success.
    #[instrument(skip(self, request), fields(market = %request.market, symbol = %request.symbol))]
    pub async fn fetch(&self, request: &FetchRequest) -> Result<RawSeries, RetrievalError> {
        let order = self.providers_for(request.market);
        if order.is_empty() {
            return Err(RetrievalError::UnsupportedMarket(request.market.to_string()));
        }
        let (_, series) = self
            .first_success(request.market, &request.symbol, &order, |adapter| async move {
                adapter.fetch(request).await
            })
            .await?;
        Ok(series)
    }

    /// Lists the instruments of `market` from the first listing-capable
    /// adapter that answers, with the same retry and circuit rules as bars.
    #[instrument(skip(self))]
    pub async fn list_instruments(&self, market: Market) -> Result<RawListing, RetrievalError> {
        let order = self.listers_for(market);
        if order.is_empty() {
            return Err(RetrievalError::UnsupportedListing(market.to_string()));
        }
        let (provider, instruments) = self
            .first_success(market, ALL_SYMBOLS, &order, |adapter| async move {
                adapter.list_instruments(market).await
            })
            .await?;
        Ok(RawListing {
            provider,
            instruments,
        })
    }

    async fn first_success<T, F, Fut>(
        &self,
        market: Market,
        subject: &str,
        order: &[String],
        call: F,
    ) -> Result<(String, T), RetrievalError>
    where
        F: Fn(Arc<dyn ProviderAdapter>) -> Fut,
        Fut: Future<Output = Result<T, FetchOutcome>>,
    {
        let mut attempts = Vec::with_capacity(order.len());
        let mut all_no_data = true;
        for id in order {
            let Some(adapter) = self.adapters.get(id) else {
                continue;
            };
            if self.circuit_open(id) {
                debug!(provider = %id, "Skipping provider with open circuit");
                attempts.push(format!("{id}: circuit open"));
                all_no_data = false;
                continue;
            }

            let limit = self.retry.call_timeout();
            let (result, calls) = with_retry(
                || Self::call_with_timeout(id, call(Arc::clone(adapter)), limit),
                &self.retry,
            )
            .await;

            match result {
                Ok(value) => {
                    self.record_success(id);
                    info!(provider = %id, calls, "Provider call succeeded");
                    return Ok((id.clone(), value));
                }
                Err(FetchOutcome::NoData) => {
                    debug!(provider = %id, "Provider has no data");
                    attempts.push(format!("{id}: no data"));
                }
                Err(outcome) => {
                    warn!(provider = %id, calls, error = %outcome, "Provider failed");
                    self.record_failure(id);
                    attempts.push(format!("{id}: {outcome} after {calls} call(s)"));
                    all_no_data = false;
                }
            }
        }

        Err(RetrievalError::AllProvidersExhausted {
            market: market.to_string(),
            symbol: subject.to_string(),
            all_no_data,
            attempts,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{ScriptedAdapter, instrument, raw_bar};
    use super::*;
    use crate::core::{DateRange, FailureKind, Resolution};
    use chrono::NaiveDate;

    fn request(market: Market) -> FetchRequest {
        FetchRequest {
            market,
            symbol: "000001".to_string(),
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            )
            .unwrap(),
            resolution: Resolution::Daily,
        }
    }

    fn chain(adapters: &[Arc<ScriptedAdapter>]) -> ProviderChain {
        let ids: Vec<String> = adapters.iter().map(|a| a.id.to_string()).collect();
        ProviderChain::new(
            adapters
                .iter()
                .map(|a| Arc::clone(a) as Arc<dyn ProviderAdapter>)
                .collect(),
            HashMap::from([(Market::China, ids)]),
            RetryConfig {
                max_retries: 2,
                base_delay_ms: 200,
                factor: 2,
                max_delay_ms: 2_000,
                call_timeout_ms: 1_000,
            },
            CircuitConfig {
                failure_threshold: 3,
                cooldown_secs: 300,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_follows_priority_order() {
        let a = Arc::new(ScriptedAdapter::failing(
            "akshare",
            FetchOutcome::NetworkError("connection reset".into()),
        ));
        let b = Arc::new(ScriptedAdapter::failing("tushare", FetchOutcome::NoData));
        let c = Arc::new(ScriptedAdapter::succeeding(
            "baostock",
            vec![raw_bar("2024-01-02", 9.2)],
        ));
        let d = Arc::new(ScriptedAdapter::succeeding(
            "spare",
            vec![raw_bar("2024-01-02", 1.0)],
        ));
        let chain = chain(&[a.clone(), b.clone(), c.clone(), d.clone()]);

        let series = chain.fetch(&request(Market::China)).await.unwrap();

        assert_eq!(series.provider, "baostock");
        assert_eq!(a.calls(), 3);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 1);
        assert_eq!(d.calls(), 0);
        assert_eq!(chain.health("akshare").consecutive_failures, 1);
        assert_eq!(chain.health("tushare").consecutive_failures, 0);
        assert_eq!(chain.health("baostock"), ProviderHealth::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_threshold_and_recovers() {
        let flaky = Arc::new(ScriptedAdapter::failing(
            "akshare",
            FetchOutcome::AuthError("token revoked".into()),
        ));
        let backup = Arc::new(ScriptedAdapter::succeeding(
            "tushare",
            vec![raw_bar("2024-01-02", 9.2)],
        ));
        let chain = chain(&[flaky.clone(), backup.clone()]);

        for _ in 0..3 {
            chain.fetch(&request(Market::China)).await.unwrap();
        }
        assert_eq!(flaky.calls(), 3);
        assert!(chain.health("akshare").circuit_open_until.is_some());

        // Fourth call inside the cooldown window skips the open circuit
        chain.fetch(&request(Market::China)).await.unwrap();
        assert_eq!(flaky.calls(), 3);
        assert_eq!(backup.calls(), 4);

        tokio::time::advance(Duration::from_secs(301)).await;
        chain.fetch(&request(Market::China)).await.unwrap();
        assert_eq!(flaky.calls(), 4);
        assert_eq!(chain.health("akshare").consecutive_failures, 1);
        assert!(chain.health("akshare").circuit_open_until.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures() {
        let adapter = Arc::new(ScriptedAdapter::failing(
            "akshare",
            FetchOutcome::Malformed("truncated body".into()),
        ));
        let chain = chain(&[adapter.clone()]);
        let _ = chain.fetch(&request(Market::China)).await;
        let _ = chain.fetch(&request(Market::China)).await;
        assert_eq!(chain.health("akshare").consecutive_failures, 2);
        // Malformed bodies are not retried
        assert_eq!(adapter.calls(), 2);

        chain.record_success("akshare");
        assert_eq!(chain.health("akshare").consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_distinguishes_no_data_from_errors() {
        let a = Arc::new(ScriptedAdapter::failing("akshare", FetchOutcome::NoData));
        let b = Arc::new(ScriptedAdapter::failing("tushare", FetchOutcome::NoData));
        let err = chain(&[a, b]).fetch(&request(Market::China)).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NoData);

        let a = Arc::new(ScriptedAdapter::failing("akshare", FetchOutcome::NoData));
        let b = Arc::new(ScriptedAdapter::failing(
            "tushare",
            FetchOutcome::RateLimited("429".into()),
        ));
        let err = chain(&[a, b.clone()]).fetch(&request(Market::China)).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::TemporarilyUnavailable);
        assert_eq!(b.calls(), 3);
        match err {
            RetrievalError::AllProvidersExhausted { attempts, .. } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0], "akshare: no data");
                assert!(attempts[1].starts_with("tushare: rate limited"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_adapter_times_out_as_network_error() {
        let slow = Arc::new(
            ScriptedAdapter::succeeding("akshare", vec![raw_bar("2024-01-02", 9.2)])
                .with_delay(Duration::from_secs(5)),
        );
        let err = chain(&[slow.clone()]).fetch(&request(Market::China)).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::TemporarilyUnavailable);
        assert_eq!(slow.calls(), 3);
    }

    #[tokio::test]
    async fn test_unsupported_market() {
        let a = Arc::new(ScriptedAdapter::failing("akshare", FetchOutcome::NoData));
        let err = chain(&[a]).fetch(&request(Market::UnitedStates)).await.unwrap_err();
        assert_eq!(err, RetrievalError::UnsupportedMarket("US".to_string()));
        assert_eq!(err.kind(), FailureKind::Unsupported);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_skips_adapters_that_cannot_list() {
        let bars_only = Arc::new(ScriptedAdapter::succeeding(
            "akshare",
            vec![raw_bar("2024-01-02", 9.2)],
        ));
        let flaky = Arc::new(
            ScriptedAdapter::failing("tushare", FetchOutcome::NoData)
                .with_listing(Err(FetchOutcome::RateLimited("429".into()))),
        );
        let lister = Arc::new(
            ScriptedAdapter::failing("eastmoney", FetchOutcome::NoData)
                .with_listing(Ok(vec![instrument("000001", "平安银行")])),
        );
        let chain = chain(&[bars_only.clone(), flaky.clone(), lister.clone()]);
        assert_eq!(chain.listers_for(Market::China), vec!["tushare", "eastmoney"]);

        let listing = chain.list_instruments(Market::China).await.unwrap();
        assert_eq!(listing.provider, "eastmoney");
        assert_eq!(listing.instruments.len(), 1);
        assert_eq!(bars_only.calls(), 0);
        // Rate limits are retried like bar fetches and count toward the circuit
        assert_eq!(flaky.calls(), 3);
        assert_eq!(chain.health("tushare").consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_listing_without_capable_adapter_is_unsupported() {
        let a = Arc::new(ScriptedAdapter::succeeding(
            "akshare",
            vec![raw_bar("2024-01-02", 9.2)],
        ));
        let err = chain(&[a]).list_instruments(Market::China).await.unwrap_err();
        assert_eq!(err, RetrievalError::UnsupportedListing("CN".to_string()));
        assert_eq!(err.kind(), FailureKind::Unsupported);
    }
}
