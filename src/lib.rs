pub mod cache;
pub mod chain;
pub mod cli;
pub mod core;
pub mod providers;
pub mod retrieval;
pub mod store;

use crate::cache::CacheManager;
use crate::chain::ProviderChain;
use crate::core::config::AppConfig;
use crate::core::{DateRange, FetchRequest, Market, Resolution, StandardNormalizer};
use crate::retrieval::{RetrieveOptions, Retriever};
use crate::store::TierSet;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Fetch {
        market: Market,
        symbol: String,
        range: DateRange,
        resolution: Resolution,
        force_refresh: bool,
    },
    Instruments {
        market: Market,
        search: Option<String>,
        force_refresh: bool,
    },
    Invalidate {
        key: String,
    },
    Stats,
    Markets,
}

/// Wires tiers, adapters and the chain from configuration. The tier set is
/// returned alongside so callers can bootstrap from the file tier.
pub fn build_retriever(config: &AppConfig) -> (Retriever, TierSet) {
    let tiers = TierSet::from_config(config);
    let cache = CacheManager::new(tiers.ordered());
    let chain = ProviderChain::from_config(config, providers::build_adapters(config));
    let retriever = Retriever::new(
        cache,
        chain,
        Arc::new(StandardNormalizer),
        config.retrieval.deadline(),
        config.retrieval.write_policy,
    );
    (retriever, tiers)
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("quotecache starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let (retriever, tiers) = build_retriever(&config);
    match command {
        AppCommand::Fetch {
            market,
            symbol,
            range,
            resolution,
            force_refresh,
        } => {
            retriever.bootstrap(&tiers).await;
            let request = FetchRequest {
                market,
                symbol,
                range,
                resolution,
            };
            let options = RetrieveOptions {
                force_refresh,
                caller: Some("cli".to_string()),
            };
            cli::fetch::run(&retriever, request, options).await
        }
        AppCommand::Instruments {
            market,
            search,
            force_refresh,
        } => {
            retriever.bootstrap(&tiers).await;
            let options = RetrieveOptions {
                force_refresh,
                caller: Some("cli".to_string()),
            };
            cli::instruments::run(&retriever, market, search.as_deref(), options).await
        }
        AppCommand::Invalidate { key } => cli::cache::invalidate(&retriever, &key).await,
        AppCommand::Stats => cli::cache::stats(&retriever).await,
        AppCommand::Markets => cli::markets::run(retriever.chain()),
    }
}
