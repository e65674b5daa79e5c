//! Deterministic cache keys for bar and instrument-list requests

use super::bars::{DateRange, Market, Resolution};
use super::error::KeyParseError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

const KEY_VERSION: &str = "v1";

/// Symbol slot of instrument-list keys, which cover a whole market.
pub const ALL_SYMBOLS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataKind {
    #[default]
    History,
    Instruments,
}

impl Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataKind::History => write!(f, "history"),
            DataKind::Instruments => write!(f, "instruments"),
        }
    }
}

/// Identifies one logical request. Overlapping ranges are distinct keys.
///
/// History keys always carry a range and resolution; instrument-list keys
/// carry neither.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub market: Market,
    pub symbol: String,
    pub kind: DataKind,
    pub range: Option<DateRange>,
    pub resolution: Option<Resolution>,
}

impl CacheKey {
    pub fn history(market: Market, symbol: &str, range: DateRange, resolution: Resolution) -> Self {
        Self {
            market,
            symbol: normalize_symbol(symbol),
            kind: DataKind::History,
            range: Some(range),
            resolution: Some(resolution),
        }
    }

    /// Key for the full instrument list of `market`.
    pub fn instruments(market: Market) -> Self {
        Self {
            market,
            symbol: ALL_SYMBOLS.to_string(),
            kind: DataKind::Instruments,
            range: None,
            resolution: None,
        }
    }

    /// Builds a key from named fields given in any order.
    pub fn from_fields<'a, I>(fields: I) -> Result<Self, KeyParseError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let fields: BTreeMap<&str, &str> = fields.into_iter().collect();
        let field = |name: &'static str| {
            fields
                .get(name)
                .copied()
                .ok_or(KeyParseError::MissingField(name))
        };
        let invalid = |name: &'static str, value: &str| KeyParseError::InvalidField {
            field: name,
            value: value.to_string(),
        };

        let market = field("market")?;
        let market = market.parse().map_err(|_| invalid("market", market))?;
        match field("kind")? {
            "history" => {}
            "instruments" => return Ok(Self::instruments(market)),
            other => return Err(invalid("kind", other)),
        }
        let start_raw = field("start")?;
        let end_raw = field("end")?;
        let start = parse_date(start_raw).ok_or_else(|| invalid("start", start_raw))?;
        let end = parse_date(end_raw).ok_or_else(|| invalid("end", end_raw))?;
        let range = DateRange::new(start, end).map_err(|_| invalid("end", end_raw))?;
        let resolution = field("resolution")?;
        let resolution = resolution
            .parse()
            .map_err(|_| invalid("resolution", resolution))?;
        let symbol = unescape(field("symbol")?);
        if symbol.trim().is_empty() {
            return Err(invalid("symbol", &symbol));
        }

        Ok(Self::history(market, &symbol, range, resolution))
    }

    /// Canonical encoding: fields sorted by name, so construction order never
    /// affects the result.
    pub fn encode(&self) -> String {
        let mut fields = BTreeMap::new();
        fields.insert("kind", self.kind.to_string());
        fields.insert("market", self.market.code().to_string());
        fields.insert("symbol", escape(&self.symbol));
        if let Some(range) = self.range {
            fields.insert("start", range.start.to_string());
            fields.insert("end", range.end.to_string());
        }
        if let Some(resolution) = self.resolution {
            fields.insert("resolution", resolution.to_string());
        }

        let body = fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(";");
        format!("{KEY_VERSION};{body}")
    }

    /// Filesystem-safe digest of the canonical encoding.
    pub fn digest(&self) -> String {
        blake3::hash(self.encode().as_bytes()).to_hex().to_string()
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for CacheKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(';');
        match parts.next() {
            Some(KEY_VERSION) => {}
            other => {
                return Err(KeyParseError::UnsupportedVersion(
                    other.unwrap_or_default().to_string(),
                ));
            }
        }
        let mut fields = Vec::new();
        for part in parts {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| KeyParseError::Malformed(part.to_string()))?;
            fields.push((name, value));
        }
        Self::from_fields(fields)
    }
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn escape(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace(';', "%3B")
        .replace('=', "%3D")
}

fn unescape(value: &str) -> String {
    value
        .replace("%3D", "=")
        .replace("%3B", ";")
        .replace("%25", "%")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q1_2024() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_key_is_independent_of_field_order() {
        let a = CacheKey::from_fields([
            ("market", "CN"),
            ("symbol", "000001"),
            ("kind", "history"),
            ("start", "2024-01-01"),
            ("end", "2024-03-31"),
            ("resolution", "1d"),
        ])
        .unwrap();
        let b = CacheKey::from_fields([
            ("resolution", "1d"),
            ("end", "2024-03-31"),
            ("start", "2024-01-01"),
            ("symbol", "000001"),
            ("market", "CN"),
            ("kind", "history"),
        ])
        .unwrap();
        let c = CacheKey::history(Market::China, "000001", q1_2024(), Resolution::Daily);

        assert_eq!(a, b);
        assert_eq!(a.encode(), b.encode());
        assert_eq!(a.encode(), c.encode());
        assert_eq!(a.digest(), c.digest());
    }

    #[test]
    fn test_encoding_round_trips_through_from_str() {
        let key = CacheKey::history(Market::UnitedStates, "brk;b=x", q1_2024(), Resolution::Weekly);
        let parsed: CacheKey = key.encode().parse().unwrap();
        assert_eq!(parsed, key);
        assert_eq!(parsed.symbol, "BRK;B=X");
    }

    #[test]
    fn test_overlapping_ranges_are_distinct() {
        let other = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 30).unwrap(),
        )
        .unwrap();
        let a = CacheKey::history(Market::China, "000001", q1_2024(), Resolution::Daily);
        let b = CacheKey::history(Market::China, "000001", other, Resolution::Daily);
        assert_ne!(a.encode(), b.encode());
    }

    #[test]
    fn test_symbol_is_normalized() {
        let a = CacheKey::history(Market::UnitedStates, " aapl ", q1_2024(), Resolution::Daily);
        let b = CacheKey::history(Market::UnitedStates, "AAPL", q1_2024(), Resolution::Daily);
        assert_eq!(a, b);
    }

    #[test]
    fn test_instrument_keys_cover_the_market() {
        let key = CacheKey::instruments(Market::China);
        assert_eq!(key.encode(), "v1;kind=instruments;market=CN;symbol=*");
        assert_eq!(key.encode().parse::<CacheKey>().unwrap(), key);
        // Stray range fields are ignored for instrument lists
        let parsed: CacheKey = "v1;kind=instruments;market=CN;symbol=*;start=2024-01-01"
            .parse()
            .unwrap();
        assert_eq!(parsed, key);
        assert_ne!(
            key,
            CacheKey::history(Market::China, ALL_SYMBOLS, q1_2024(), Resolution::Daily)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "v0;market=CN".parse::<CacheKey>(),
            Err(KeyParseError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            "v1;market=CN;symbol=1".parse::<CacheKey>(),
            Err(KeyParseError::MissingField(_))
        ));
        assert!(matches!(
            "v1;market=JP;symbol=1;kind=history;start=2024-01-01;end=2024-01-02;resolution=1d"
                .parse::<CacheKey>(),
            Err(KeyParseError::InvalidField { field: "market", .. })
        ));
        assert!(matches!(
            "v1;garbage".parse::<CacheKey>(),
            Err(KeyParseError::Malformed(_))
        ));
    }
}
