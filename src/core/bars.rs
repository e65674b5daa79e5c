//! Bar series and request primitives shared by every layer

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "CN")]
    China,
    #[serde(rename = "HK")]
    HongKong,
    #[serde(rename = "US")]
    UnitedStates,
}

/// Static descriptive data for a market.
#[derive(Debug, Clone, Copy)]
pub struct MarketInfo {
    pub name: &'static str,
    pub currency: &'static str,
    pub timezone: &'static str,
    pub trading_hours: &'static str,
}

impl Market {
    pub const ALL: [Market; 3] = [Market::China, Market::HongKong, Market::UnitedStates];

    pub fn code(&self) -> &'static str {
        match self {
            Market::China => "CN",
            Market::HongKong => "HK",
            Market::UnitedStates => "US",
        }
    }

    pub fn info(&self) -> MarketInfo {
        match self {
            Market::China => MarketInfo {
                name: "China A-Shares",
                currency: "CNY",
                timezone: "Asia/Shanghai",
                trading_hours: "09:30-15:00",
            },
            Market::HongKong => MarketInfo {
                name: "Hong Kong Stocks",
                currency: "HKD",
                timezone: "Asia/Hong_Kong",
                trading_hours: "09:30-16:00",
            },
            Market::UnitedStates => MarketInfo {
                name: "US Stocks",
                currency: "USD",
                timezone: "America/New_York",
                trading_hours: "09:30-16:00",
            },
        }
    }
}

impl Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Market {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CN" => Ok(Market::China),
            "HK" => Ok(Market::HongKong),
            "US" => Ok(Market::UnitedStates),
            _ => Err(anyhow!("Invalid market: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Resolution::Daily => "1d",
                Resolution::Weekly => "1wk",
                Resolution::Monthly => "1mo",
            }
        )
    }
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1d" | "d" | "daily" => Ok(Resolution::Daily),
            "1wk" | "w" | "weekly" => Ok(Resolution::Weekly),
            "1mo" | "m" | "monthly" => Ok(Resolution::Monthly),
            _ => Err(anyhow!("Invalid resolution: {}", s)),
        }
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> anyhow::Result<Self> {
        if start > end {
            return Err(anyhow!("Range start {} is after end {}", start, end));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_close: Option<f64>,
    /// Traded value in the quote currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// Close-to-close change in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct_change: Option<f64>,
}

impl Bar {
    /// `low <= open, close <= high`, all prices finite.
    pub fn is_consistent(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite())
            && self.low <= self.high
            && self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }
}

/// Bars ordered by strictly increasing date.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BarSeries(Vec<Bar>);

impl BarSeries {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self(bars)
    }

    pub fn bars(&self) -> &[Bar] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.0.last()
    }

    /// Checks ordering and OHLC consistency, returning a description of the
    /// first violation.
    pub fn validate(&self) -> Result<(), String> {
        for (index, bar) in self.0.iter().enumerate() {
            if !bar.is_consistent() {
                return Err(format!(
                    "bar {} on {} violates low <= open,close <= high (o={} h={} l={} c={})",
                    index, bar.date, bar.open, bar.high, bar.low, bar.close
                ));
            }
        }
        if let Some(pair) = self.0.windows(2).find(|w| w[0].date >= w[1].date) {
            return Err(format!(
                "dates not strictly increasing: {} followed by {}",
                pair[0].date, pair[1].date
            ));
        }
        Ok(())
    }

    /// Keeps only the bars inside `range`.
    pub fn within(self, range: &DateRange) -> Self {
        Self(self.0.into_iter().filter(|b| range.contains(b.date)).collect())
    }
}

impl From<Vec<Bar>> for BarSeries {
    fn from(bars: Vec<Bar>) -> Self {
        Self(bars)
    }
}

impl IntoIterator for BarSeries {
    type Item = Bar;
    type IntoIter = std::vec::IntoIter<Bar>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
