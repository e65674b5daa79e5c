//! Conversion of raw provider rows into the canonical bar schema

use super::bars::{Bar, BarSeries};
use super::error::NormalizationError;
use super::provider::RawSeries;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw: RawSeries, provider_id: &str)
    -> Result<BarSeries, NormalizationError>;
}

/// Default cleaning rules:
/// - rows with unparseable dates are dropped
/// - duplicate dates keep the last row seen
/// - output is sorted by date
/// - a missing or zero price is carried forward from the same column of the
///   previous bar, or from the bar's own close when there is none
/// - a missing percent change is derived from the previous close
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardNormalizer;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"];

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    // Some providers append a time component
    let value = value.split([' ', 'T']).next().unwrap_or(value);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

fn present(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v != 0.0)
}

fn percent_change(previous: f64, current: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    let pct = (current - previous) / previous * 100.0;
    Some((pct * 10_000.0).round() / 10_000.0)
}

impl Normalizer for StandardNormalizer {
    fn normalize(
        &self,
        raw: RawSeries,
        provider_id: &str,
    ) -> Result<BarSeries, NormalizationError> {
        let total = raw.records.len();
        let mut by_date = BTreeMap::new();
        for record in raw.records {
            match parse_date(&record.date) {
                Some(date) => {
                    by_date.insert(date, record);
                }
                None => debug!(provider = provider_id, date = %record.date, "Dropping row with bad date"),
            }
        }

        let mut bars: Vec<Bar> = Vec::with_capacity(by_date.len());
        for (date, record) in by_date {
            let previous = bars.last();
            let close = match present(record.close).or(previous.map(|p| p.close)) {
                Some(close) => close,
                None => {
                    return Err(NormalizationError::InvalidRecord {
                        provider: provider_id.to_string(),
                        reason: format!("no close price on or before {date}"),
                    });
                }
            };
            let fill = |value: Option<f64>, column: fn(&Bar) -> f64| {
                present(value).or(previous.map(column)).unwrap_or(close)
            };
            let pct_change = record
                .pct_change
                .filter(|v| v.is_finite())
                .or_else(|| previous.and_then(|p| percent_change(p.close, close)));
            let bar = Bar {
                date,
                open: fill(record.open, |b| b.open),
                high: fill(record.high, |b| b.high),
                low: fill(record.low, |b| b.low),
                close,
                volume: record.volume.filter(|v| v.is_finite()).unwrap_or(0.0),
                adjusted_close: present(record.adjusted_close),
                amount: record.amount.filter(|v| v.is_finite()),
                pct_change,
            };
            bars.push(bar);
        }

        if bars.is_empty() {
            return Err(NormalizationError::Empty {
                provider: provider_id.to_string(),
            });
        }
        debug!(
            provider = provider_id,
            rows = total,
            bars = bars.len(),
            "Normalized provider payload"
        );
        Ok(BarSeries::new(bars))
    }
}
