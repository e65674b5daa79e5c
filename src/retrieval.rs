//! The single read path: cache first, then the provider chain, with
//! concurrent misses for one key coalesced into a single fetch.

use crate::cache::CacheManager;
use crate::chain::ProviderChain;
use crate::core::config::WritePolicy;
use crate::core::key::ALL_SYMBOLS;
use crate::core::{
    BarSeries, CacheKey, DateRange, Entry, FetchRequest, Instrument, InstrumentList, Market,
    Normalizer, Payload, Resolution, RetrievalError, Tier, TierStats,
};
use crate::store::TierSet;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

type SharedFetch = Shared<BoxFuture<'static, Result<Payload, RetrievalError>>>;

/// Per-call knobs. The caller identity is only recorded in logs.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub force_refresh: bool,
    pub caller: Option<String>,
}

/// What a cache miss has to fetch upstream.
#[derive(Debug, Clone)]
enum Job {
    History(FetchRequest),
    Instruments(Market),
}

impl Job {
    fn key(&self) -> CacheKey {
        match self {
            Job::History(request) => CacheKey::history(
                request.market,
                &request.symbol,
                request.range,
                request.resolution,
            ),
            Job::Instruments(market) => CacheKey::instruments(*market),
        }
    }
}

#[derive(Clone)]
pub struct Retriever {
    inner: Arc<Inner>,
}

struct Inner {
    cache: CacheManager,
    chain: ProviderChain,
    normalizer: Arc<dyn Normalizer>,
    deadline: Duration,
    write_policy: WritePolicy,
    inflight: Mutex<HashMap<CacheKey, SharedFetch>>,
}

/// Drops the registry entry when the fetch task ends, even by panic.
struct FlightGuard {
    inner: Arc<Inner>,
    key: CacheKey,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.flights().remove(&self.key);
    }
}

fn unexpected_payload(key: &CacheKey) -> RetrievalError {
    RetrievalError::Internal(format!("cache entry for {key} holds another kind of payload"))
}

impl Inner {
    fn flights(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, SharedFetch>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetches the job upstream and writes the result through the cache.
    /// Also returns the fastest tier's write when it is still pending.
    async fn fetch_and_fill(
        &self,
        key: &CacheKey,
        job: &Job,
    ) -> Result<(Payload, Option<JoinHandle<()>>), RetrievalError> {
        let (payload, provider) = match job {
            Job::History(request) => {
                let (series, provider) = self.fetch_bars(request).await?;
                (Payload::Bars(series), provider)
            }
            Job::Instruments(market) => {
                let (list, provider) = self.fetch_instruments(*market).await?;
                (Payload::Instruments(list), provider)
            }
        };

        let ttl = self
            .cache
            .tiers()
            .first()
            .map(|tier| tier.ttl())
            .unwrap_or_default();
        let entry = Entry::new(key.clone(), payload.clone(), ttl, &provider);
        let pending = self.cache.put_with_policy(&entry, self.write_policy).await;
        info!(%key, provider = %provider, items = payload.len(), "Fetched and cached");
        Ok((payload, pending))
    }

    async fn fetch_bars(&self, request: &FetchRequest) -> Result<(BarSeries, String), RetrievalError> {
        let raw = self.chain.fetch(request).await?;
        let provider = raw.provider.clone();
        let malformed = |reason: String| RetrievalError::MalformedData {
            provider: provider.clone(),
            reason,
        };

        let series = self
            .normalizer
            .normalize(raw, &provider)
            .map_err(|e| malformed(e.to_string()))?
            .within(&request.range);
        series.validate().map_err(malformed)?;
        if series.is_empty() {
            return Err(RetrievalError::AllProvidersExhausted {
                market: request.market.to_string(),
                symbol: request.symbol.clone(),
                all_no_data: true,
                attempts: vec![format!("{provider}: no bars in {}", request.range)],
            });
        }
        Ok((series, provider))
    }

    async fn fetch_instruments(&self, market: Market) -> Result<(InstrumentList, String), RetrievalError> {
        let raw = self.chain.list_instruments(market).await?;
        let list = InstrumentList::new(raw.instruments);
        if list.is_empty() {
            return Err(RetrievalError::AllProvidersExhausted {
                market: market.to_string(),
                symbol: ALL_SYMBOLS.to_string(),
                all_no_data: true,
                attempts: vec![format!("{}: no usable instruments", raw.provider)],
            });
        }
        Ok((list, raw.provider))
    }
}

impl Retriever {
    pub fn new(
        cache: CacheManager,
        chain: ProviderChain,
        normalizer: Arc<dyn Normalizer>,
        deadline: Duration,
        write_policy: WritePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                chain,
                normalizer,
                deadline,
                write_policy,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.inner.chain
    }

    /// Daily bars for `symbol` over `range`.
    pub async fn retrieve(
        &self,
        market: Market,
        symbol: &str,
        range: DateRange,
    ) -> Result<BarSeries, RetrievalError> {
        let request = FetchRequest {
            market,
            symbol: symbol.to_string(),
            range,
            resolution: Resolution::Daily,
        };
        self.retrieve_with(request, RetrieveOptions::default()).await
    }

    #[instrument(
        skip(self, request, options),
        fields(
            market = %request.market,
            symbol = %request.symbol,
            range = %request.range,
            caller = options.caller.as_deref().unwrap_or("anonymous"),
        )
    )]
    pub async fn retrieve_with(
        &self,
        request: FetchRequest,
        options: RetrieveOptions,
    ) -> Result<BarSeries, RetrievalError> {
        let job = Job::History(request);
        let key = job.key();
        self.within_deadline(self.resolve(job, options.force_refresh))
            .await?
            .into_bars()
            .ok_or_else(|| unexpected_payload(&key))
    }

    /// Every instrument of `market`, cached like bars under a market-wide key.
    #[instrument(
        skip(self, options),
        fields(caller = options.caller.as_deref().unwrap_or("anonymous"))
    )]
    pub async fn instruments(
        &self,
        market: Market,
        options: RetrieveOptions,
    ) -> Result<InstrumentList, RetrievalError> {
        let job = Job::Instruments(market);
        let key = job.key();
        self.within_deadline(self.resolve(job, options.force_refresh))
            .await?
            .into_instruments()
            .ok_or_else(|| unexpected_payload(&key))
    }

    /// Instruments of `market` whose symbol or name contains `keyword`,
    /// ignoring case.
    pub async fn search(
        &self,
        market: Market,
        keyword: &str,
        options: RetrieveOptions,
    ) -> Result<Vec<Instrument>, RetrievalError> {
        let list = self.instruments(market, options).await?;
        let matches = list.search(keyword);
        debug!(%market, keyword, matches = matches.len(), "Searched instruments");
        Ok(matches)
    }

    async fn within_deadline<T>(
        &self,
        work: impl Future<Output = Result<T, RetrievalError>>,
    ) -> Result<T, RetrievalError> {
        let deadline = self.inner.deadline;
        match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?deadline, "Retrieval deadline exceeded");
                Err(RetrievalError::DeadlineExceeded(deadline))
            }
        }
    }

    async fn resolve(&self, job: Job, force_refresh: bool) -> Result<Payload, RetrievalError> {
        let key = job.key();
        if force_refresh {
            debug!(%key, "Forced refresh, skipping cache read");
        } else if let Some(entry) = self.inner.cache.get(&key).await {
            return Ok(entry.payload);
        }
        self.flight(key, job).await
    }

    /// Joins the in-flight fetch for `key` or starts one. The fetch runs as
    /// its own task so a caller giving up does not cancel it.
    ///
    /// The key stays registered until the fastest tier holds the entry, so
    /// a caller arriving between completion and a background write joins the
    /// finished fetch instead of starting another.
    fn flight(&self, key: CacheKey, job: Job) -> SharedFetch {
        let mut flights = self.inner.flights();
        if let Some(existing) = flights.get(&key) {
            debug!(%key, "Joining in-flight fetch");
            return existing.clone();
        }

        let guard = FlightGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
        };
        let handle = tokio::spawn(async move {
            let result = guard.inner.fetch_and_fill(&guard.key, &job).await;
            match result {
                Ok((payload, Some(pending))) => {
                    tokio::spawn(async move {
                        let _ = pending.await;
                        drop(guard);
                    });
                    Ok(payload)
                }
                Ok((payload, None)) => Ok(payload),
                Err(e) => Err(e),
            }
        });
        let shared = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(RetrievalError::Internal(e.to_string())))
        }
        .boxed()
        .shared();
        flights.insert(key, shared.clone());
        shared
    }

    /// Removes `key` from every tier.
    pub async fn invalidate(&self, key: &CacheKey) {
        info!(%key, "Invalidating cache entry");
        self.inner.cache.invalidate(key).await;
    }

    pub async fn stats(&self) -> Vec<TierStats> {
        self.inner.cache.stats().await
    }

    /// Number of fetches currently in flight.
    pub fn inflight(&self) -> usize {
        self.inner.flights().len()
    }

    /// Seeds faster tiers from the file tier when the structured store could
    /// not be opened. Returns the number of entries loaded.
    pub async fn bootstrap(&self, tiers: &TierSet) -> usize {
        if tiers.structured.is_available() {
            return 0;
        }
        match tiers.file.load_all().await {
            Ok(entries) if entries.is_empty() => 0,
            Ok(entries) => {
                let loaded = self.inner.cache.warm(entries, Tier::File).await;
                info!(loaded, "Bootstrapped cache from file tier");
                loaded
            }
            Err(e) => {
                warn!(error = %e, "File tier bootstrap failed");
                0
            }
        }
    }
}
