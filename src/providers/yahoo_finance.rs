use super::util::{get_json, http_client};
use crate::core::{FetchOutcome, FetchRequest, Market, ProviderAdapter, RawBar, RawSeries, Resolution};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate};
use serde::Deserialize;
use tracing::{debug, instrument};

pub const PROVIDER_ID: &str = "yahoo";

/// Maps a market-local code to the symbol Yahoo expects.
fn yahoo_symbol(market: Market, symbol: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if symbol.contains('.') {
        return symbol;
    }
    match market {
        Market::UnitedStates => symbol,
        Market::HongKong => {
            let digits = symbol.trim_start_matches('0');
            format!("{digits:0>4}.HK")
        }
        Market::China => {
            if symbol.starts_with('6') || symbol.starts_with('9') {
                format!("{symbol}.SS")
            } else {
                format!("{symbol}.SZ")
            }
        }
    }
}

fn interval(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Daily => "1d",
        Resolution::Weekly => "1wk",
        Resolution::Monthly => "1mo",
    }
}

fn epoch_seconds(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<Quote>,
    adjclose: Option<Vec<AdjClose>>,
}

#[derive(Deserialize, Debug, Default)]
struct Quote {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<f64>>>,
}

#[derive(Deserialize, Debug)]
struct AdjClose {
    adjclose: Option<Vec<Option<f64>>>,
}

fn column(values: &Option<Vec<Option<f64>>>, index: usize) -> Option<f64> {
    values.as_ref().and_then(|v| v.get(index).copied().flatten())
}

fn extract_bars(item: &ChartItem) -> Vec<RawBar> {
    let Some(timestamps) = item.timestamp.as_ref() else {
        return Vec::new();
    };
    let Some(indicators) = item.indicators.as_ref() else {
        return Vec::new();
    };
    let empty = Quote::default();
    let quote = indicators.quote.first().unwrap_or(&empty);
    let adjclose = indicators
        .adjclose
        .as_ref()
        .and_then(|a| a.first())
        .and_then(|a| a.adjclose.as_ref());

    timestamps
        .iter()
        .enumerate()
        .filter_map(|(index, ts)| {
            let local = DateTime::from_timestamp(ts + item.meta.gmtoffset, 0)?;
            // Yahoo emits null rows for halted sessions
            let close = column(&quote.close, index)?;
            Some(RawBar {
                date: local.date_naive().to_string(),
                open: column(&quote.open, index),
                high: column(&quote.high, index),
                low: column(&quote.low, index),
                close: Some(close),
                volume: column(&quote.volume, index),
                adjusted_close: adjclose.and_then(|a| a.get(index).copied().flatten()),
                amount: None,
                pct_change: None,
            })
        })
        .collect()
}

pub struct YahooFinanceProvider {
    base_url: String,
    client: reqwest::Client,
}

impl YahooFinanceProvider {
    pub fn new(base_url: &str) -> Self {
        YahooFinanceProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for YahooFinanceProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn markets(&self) -> &'static [Market] {
        &[Market::UnitedStates, Market::HongKong, Market::China]
    }

    #[instrument(
        name = "YahooBarsFetch",
        skip(self, request),
        fields(symbol = %request.symbol, market = %request.market)
    )]
    async fn fetch(&self, request: &FetchRequest) -> Result<RawSeries, FetchOutcome> {
        let symbol = yahoo_symbol(request.market, &request.symbol);
        let period1 = epoch_seconds(request.range.start);
        let period2 = request
            .range
            .end
            .checked_add_days(Days::new(1))
            .map(epoch_seconds)
            .unwrap_or(i64::MAX);
        let url = format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval={}&events=history",
            self.base_url,
            symbol,
            period1,
            period2,
            interval(request.resolution)
        );
        debug!("Requesting bars from {}", url);

        let data: YahooChartResponse = get_json(self.client.get(&url), &symbol).await?;

        if let Some(error) = data.chart.error {
            debug!(code = %error.code, description = ?error.description, "Yahoo returned an error");
            return Err(FetchOutcome::NoData);
        }
        let item = data
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or(FetchOutcome::NoData)?;

        let records = extract_bars(&item);
        if records.is_empty() {
            return Err(FetchOutcome::NoData);
        }
        Ok(RawSeries {
            provider: PROVIDER_ID.to_string(),
            records,
        })
    }
}
