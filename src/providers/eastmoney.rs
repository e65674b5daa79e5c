use super::util::{get_json, http_client};
use crate::core::{
    FetchOutcome, FetchRequest, Instrument, Market, ProviderAdapter, RawBar, RawSeries, Resolution,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

pub const PROVIDER_ID: &str = "eastmoney";

const DEFAULT_LISTING_URL: &str = "https://push2.eastmoney.com";
const LISTING_PAGE_SIZE: usize = 100;
const MAX_LISTING_PAGES: usize = 100;
/// Shanghai and Shenzhen A-share boards, '+' pre-encoded.
const A_SHARE_BOARDS: &str = "m:0%2Bt:6,m:0%2Bt:80,m:1%2Bt:2,m:1%2Bt:23,m:0%2Bt:81%2Bs:2048";

/// Shanghai listings (6xxxxx, 9xxxxx B-shares) use exchange id 1, everything
/// else is routed to Shenzhen.
fn secid(symbol: &str) -> String {
    let code = symbol.split('.').next().unwrap_or(symbol).trim();
    let exchange = if code.starts_with('6') || code.starts_with('9') {
        1
    } else {
        0
    };
    format!("{exchange}.{code}")
}

fn kline_type(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Daily => "101",
        Resolution::Weekly => "102",
        Resolution::Monthly => "103",
    }
}

#[derive(Deserialize, Debug)]
struct KlineResponse {
    data: Option<KlineData>,
}

#[derive(Deserialize, Debug)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct ListingResponse {
    data: Option<ListingData>,
}

#[derive(Deserialize, Debug)]
struct ListingData {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    diff: Vec<ListingRow>,
}

/// `f12` is the code, `f13` the exchange id, `f14` the display name.
#[derive(Deserialize, Debug)]
struct ListingRow {
    f12: String,
    #[serde(default)]
    f13: Option<u8>,
    #[serde(default)]
    f14: Option<String>,
}

impl From<ListingRow> for Instrument {
    fn from(row: ListingRow) -> Self {
        Instrument {
            symbol: row.f12,
            name: row.f14.unwrap_or_default(),
            market: Market::China,
            board: row.f13.map(|id| if id == 1 { "SH" } else { "SZ" }.to_string()),
        }
    }
}

/// Each kline is `date,open,close,high,low,volume,amount,amplitude,pct_change`;
/// the trailing fields are optional.
fn parse_kline(line: &str) -> Result<RawBar, FetchOutcome> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 6 {
        return Err(FetchOutcome::Malformed(format!(
            "kline has {} fields: '{line}'",
            fields.len()
        )));
    }
    let number = |index: usize| -> Result<Option<f64>, FetchOutcome> {
        let Some(raw) = fields.get(index).map(|f| f.trim()) else {
            return Ok(None);
        };
        if raw.is_empty() || raw == "-" {
            return Ok(None);
        }
        raw.parse::<f64>()
            .map(Some)
            .map_err(|e| FetchOutcome::Malformed(format!("bad number '{raw}' in kline: {e}")))
    };
    Ok(RawBar {
        date: fields[0].trim().to_string(),
        open: number(1)?,
        close: number(2)?,
        high: number(3)?,
        low: number(4)?,
        volume: number(5)?,
        adjusted_close: None,
        amount: number(6)?,
        pct_change: number(8)?,
    })
}

pub struct EastmoneyProvider {
    base_url: String,
    listing_url: String,
    client: reqwest::Client,
}

impl EastmoneyProvider {
    pub fn new(base_url: &str) -> Self {
        EastmoneyProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            listing_url: DEFAULT_LISTING_URL.to_string(),
            client: http_client(),
        }
    }

    pub fn with_listing_url(self, listing_url: &str) -> Self {
        EastmoneyProvider {
            listing_url: listing_url.trim_end_matches('/').to_string(),
            ..self
        }
    }
}

#[async_trait]
impl ProviderAdapter for EastmoneyProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn markets(&self) -> &'static [Market] {
        &[Market::China]
    }

    #[instrument(name = "EastmoneyBarsFetch", skip(self, request), fields(symbol = %request.symbol))]
    async fn fetch(&self, request: &FetchRequest) -> Result<RawSeries, FetchOutcome> {
        let secid = secid(&request.symbol);
        let url = format!(
            "{}/api/qt/stock/kline/get?secid={}&klt={}&fqt=1&beg={}&end={}&fields1=f1,f2,f3&fields2=f51,f52,f53,f54,f55,f56,f57,f58,f59",
            self.base_url,
            secid,
            kline_type(request.resolution),
            request.range.start.format("%Y%m%d"),
            request.range.end.format("%Y%m%d"),
        );
        debug!("Requesting klines for {} from {}", secid, url);

        let response: KlineResponse = get_json(self.client.get(&url), &secid).await?;

        let klines = response.data.map(|d| d.klines).unwrap_or_default();
        if klines.is_empty() {
            return Err(FetchOutcome::NoData);
        }
        let records = klines
            .iter()
            .map(|line| parse_kline(line))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RawSeries {
            provider: PROVIDER_ID.to_string(),
            records,
        })
    }

    fn lists_instruments(&self, market: Market) -> bool {
        market == Market::China
    }

    #[instrument(name = "EastmoneyInstrumentList", skip(self))]
    async fn list_instruments(&self, market: Market) -> Result<Vec<Instrument>, FetchOutcome> {
        if market != Market::China {
            return Err(FetchOutcome::NoData);
        }
        let mut instruments = Vec::new();
        for page in 1..=MAX_LISTING_PAGES {
            let url = format!(
                "{}/api/qt/clist/get?pn={}&pz={}&po=1&np=1&fltt=2&invt=2&fid=f12&fs={}&fields=f12,f13,f14",
                self.listing_url, page, LISTING_PAGE_SIZE, A_SHARE_BOARDS
            );
            debug!("Requesting listing page {} from {}", page, url);
            let response: ListingResponse = get_json(self.client.get(&url), "clist").await?;
            let Some(data) = response.data else {
                break;
            };
            let rows = data.diff.len();
            instruments.extend(data.diff.into_iter().map(Instrument::from));
            if rows == 0 || instruments.len() >= data.total {
                break;
            }
        }
        if instruments.is_empty() {
            return Err(FetchOutcome::NoData);
        }
        Ok(instruments)
    }
}
