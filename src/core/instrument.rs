//! Instrument metadata as listed by upstream providers

use super::bars::Market;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub name: String,
    pub market: Market,
    /// Exchange or board reported by the provider, e.g. "SZ" or "主板".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
}

/// Instruments of one market, unique by symbol and sorted by symbol.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentList(Vec<Instrument>);

impl InstrumentList {
    /// Drops rows without a symbol, trims names, and keeps the last row
    /// seen for a repeated symbol.
    pub fn new(instruments: Vec<Instrument>) -> Self {
        let mut by_symbol = BTreeMap::new();
        for mut instrument in instruments {
            instrument.symbol = instrument.symbol.trim().to_uppercase();
            if instrument.symbol.is_empty() {
                continue;
            }
            instrument.name = instrument.name.trim().to_string();
            by_symbol.insert(instrument.symbol.clone(), instrument);
        }
        Self(by_symbol.into_values().collect())
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Case-insensitive substring match on symbol or name.
    pub fn search(&self, keyword: &str) -> Vec<Instrument> {
        let keyword = keyword.trim().to_lowercase();
        self.0
            .iter()
            .filter(|i| {
                i.symbol.to_lowercase().contains(&keyword)
                    || i.name.to_lowercase().contains(&keyword)
            })
            .cloned()
            .collect()
    }
}
