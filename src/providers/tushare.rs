use super::util::{get_json, http_client};
use crate::core::{
    FetchOutcome, FetchRequest, Instrument, Market, ProviderAdapter, RawBar, RawSeries, Resolution,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

pub const PROVIDER_ID: &str = "tushare";

/// Tushare answers with this code when the per-minute quota is spent.
const RATE_LIMIT_CODE: i64 = 40203;

const BAR_FIELDS: &str = "trade_date,open,high,low,close,vol,amount,pct_chg";
const LISTING_FIELDS: &str = "ts_code,symbol,name,market";

fn ts_code(symbol: &str) -> String {
    if symbol.contains('.') {
        return symbol.to_uppercase();
    }
    if symbol.starts_with('6') || symbol.starts_with('9') {
        format!("{symbol}.SH")
    } else {
        format!("{symbol}.SZ")
    }
}

fn api_name(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Daily => "daily",
        Resolution::Weekly => "weekly",
        Resolution::Monthly => "monthly",
    }
}

fn text(row: &[Value], index: usize) -> Option<String> {
    row.get(index).and_then(Value::as_str).map(str::to_string)
}

#[derive(Serialize)]
struct TushareRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: Value,
    fields: &'a str,
}

#[derive(Deserialize, Debug)]
struct TushareResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<TushareTable>,
}

/// Column-oriented payload: `fields` names each position of every item.
#[derive(Deserialize, Debug)]
struct TushareTable {
    fields: Vec<String>,
    items: Vec<Vec<Value>>,
}

impl TushareTable {
    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    fn column(&self, name: &str) -> Result<usize, FetchOutcome> {
        self.position(name)
            .ok_or_else(|| FetchOutcome::Malformed(format!("missing column '{name}'")))
    }

    fn into_records(self) -> Result<Vec<RawBar>, FetchOutcome> {
        let date = self.column("trade_date")?;
        let open = self.column("open")?;
        let high = self.column("high")?;
        let low = self.column("low")?;
        let close = self.column("close")?;
        let volume = self.column("vol")?;
        let amount = self.position("amount");
        let pct_change = self.position("pct_chg");

        // Newest first upstream; normalization sorts
        self.items
            .iter()
            .map(|row| {
                let number = |index: usize| row.get(index).and_then(Value::as_f64);
                let date = row
                    .get(date)
                    .and_then(Value::as_str)
                    .ok_or_else(|| FetchOutcome::Malformed(format!("row without trade_date: {row:?}")))?;
                Ok(RawBar {
                    date: date.to_string(),
                    open: number(open),
                    high: number(high),
                    low: number(low),
                    close: number(close),
                    volume: number(volume),
                    adjusted_close: None,
                    // Reported in thousands of CNY
                    amount: amount.and_then(number).map(|v| v * 1_000.0),
                    pct_change: pct_change.and_then(number),
                })
            })
            .collect()
    }

    fn into_instruments(self) -> Result<Vec<Instrument>, FetchOutcome> {
        let ts_code = self.column("ts_code")?;
        let name = self.column("name")?;
        let symbol = self.position("symbol");
        let board = self.position("market");

        Ok(self
            .items
            .iter()
            .filter_map(|row| {
                let code = symbol
                    .and_then(|i| text(row, i))
                    .or_else(|| text(row, ts_code))?;
                Some(Instrument {
                    symbol: code,
                    name: text(row, name).unwrap_or_default(),
                    market: Market::China,
                    board: board.and_then(|i| text(row, i)),
                })
            })
            .collect())
    }
}

pub struct TushareProvider {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl TushareProvider {
    pub fn new(base_url: &str, token: &str) -> Self {
        TushareProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            client: http_client(),
        }
    }

    /// Calls one Tushare Pro API and returns its table, mapping the API's
    /// status codes onto fetch outcomes. An empty table is `NoData`.
    async fn call(
        &self,
        api_name: &str,
        params: Value,
        fields: &str,
        context: &str,
    ) -> Result<TushareTable, FetchOutcome> {
        if self.token.is_empty() {
            return Err(FetchOutcome::AuthError("tushare token not configured".to_string()));
        }
        let body = TushareRequest {
            api_name,
            token: &self.token,
            params,
            fields,
        };
        debug!("Requesting {} for {}", api_name, context);

        let response: TushareResponse =
            get_json(self.client.post(&self.base_url).json(&body), context).await?;

        match response.code {
            0 => {}
            RATE_LIMIT_CODE => {
                return Err(FetchOutcome::RateLimited(
                    response.msg.unwrap_or_else(|| "quota exceeded".to_string()),
                ));
            }
            code => {
                return Err(FetchOutcome::AuthError(format!(
                    "code {code}: {}",
                    response.msg.unwrap_or_default()
                )));
            }
        }

        match response.data {
            Some(table) if !table.items.is_empty() => Ok(table),
            _ => Err(FetchOutcome::NoData),
        }
    }
}

#[async_trait]
impl ProviderAdapter for TushareProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn markets(&self) -> &'static [Market] {
        &[Market::China]
    }

    #[instrument(name = "TushareBarsFetch", skip(self, request), fields(symbol = %request.symbol))]
    async fn fetch(&self, request: &FetchRequest) -> Result<RawSeries, FetchOutcome> {
        let ts_code = ts_code(&request.symbol);
        let params = json!({
            "ts_code": ts_code,
            "start_date": request.range.start.format("%Y%m%d").to_string(),
            "end_date": request.range.end.format("%Y%m%d").to_string(),
        });
        let table = self
            .call(api_name(request.resolution), params, BAR_FIELDS, &ts_code)
            .await?;
        Ok(RawSeries {
            provider: PROVIDER_ID.to_string(),
            records: table.into_records()?,
        })
    }

    fn lists_instruments(&self, market: Market) -> bool {
        market == Market::China
    }

    #[instrument(name = "TushareInstrumentList", skip(self))]
    async fn list_instruments(&self, market: Market) -> Result<Vec<Instrument>, FetchOutcome> {
        if market != Market::China {
            return Err(FetchOutcome::NoData);
        }
        let params = json!({"exchange": "", "list_status": "L"});
        self.call("stock_basic", params, LISTING_FIELDS, "stock_basic")
            .await?
            .into_instruments()
    }
}
