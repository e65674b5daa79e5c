pub mod eastmoney;
pub mod tushare;
pub mod util;
pub mod yahoo_finance;

use crate::core::ProviderAdapter;
use crate::core::config::AppConfig;
use std::sync::Arc;
use tracing::debug;

/// Builds every adapter that has a configuration section.
///
/// Priority per market is decided by the chain, not by the order returned here.
pub fn build_adapters(config: &AppConfig) -> Vec<Arc<dyn ProviderAdapter>> {
    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    if let Some(eastmoney) = &config.providers.eastmoney {
        adapters.push(Arc::new(
            eastmoney::EastmoneyProvider::new(&eastmoney.base_url)
                .with_listing_url(&eastmoney.listing_url),
        ));
    }
    if let Some(tushare) = &config.providers.tushare {
        adapters.push(Arc::new(tushare::TushareProvider::new(
            &tushare.base_url,
            &tushare.token,
        )));
    }
    if let Some(yahoo) = &config.providers.yahoo {
        adapters.push(Arc::new(yahoo_finance::YahooFinanceProvider::new(&yahoo.base_url)));
    }
    debug!(
        adapters = ?adapters.iter().map(|a| a.id().to_string()).collect::<Vec<_>>(),
        "Built provider adapters"
    );
    adapters
}
