use std::collections::HashMap;

use crate::models::{BrokerPosition, OpenPositionSnapshot};

/// Quote currency of Capital.com crypto CFD epics
pub const DEFAULT_QUOTE: &str = "USD";

/// Bidirectional ticker <-> broker epic table.
///
/// Capital.com lists crypto CFDs as `{TICKER}USD`; the LLM speaks in bare
/// tickers. Names missing from the table follow the same suffix rule, so a
/// position on an instrument outside the configured tickers still matches.
#[derive(Debug, Clone)]
pub struct SymbolMap {
    to_epic: HashMap<String, String>,
    to_symbol: HashMap<String, String>,
    quote: String,
}

impl Default for SymbolMap {
    fn default() -> Self {
        Self::from_pairs(&[("BTC", "BTCUSD"), ("ETH", "ETHUSD"), ("SOL", "SOLUSD")])
    }
}

impl SymbolMap {
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut to_epic = HashMap::new();
        let mut to_symbol = HashMap::new();
        for (symbol, epic) in pairs {
            let symbol = symbol.to_uppercase();
            let epic = epic.to_uppercase();
            to_epic.insert(symbol.clone(), epic.clone());
            to_symbol.insert(epic, symbol);
        }
        Self {
            to_epic,
            to_symbol,
            quote: DEFAULT_QUOTE.to_string(),
        }
    }

    fn has_quote_suffix(&self, name: &str) -> bool {
        name.len() > self.quote.len() && name.ends_with(&self.quote)
    }

    /// Ticker (or epic) to epic; names outside the table get the quote suffix
    pub fn to_epic(&self, symbol: &str) -> String {
        let upper = symbol.trim().to_uppercase();
        if upper.is_empty() || self.to_symbol.contains_key(&upper) {
            return upper;
        }
        if let Some(epic) = self.to_epic.get(&upper) {
            return epic.clone();
        }
        if self.has_quote_suffix(&upper) {
            upper
        } else {
            format!("{}{}", upper, self.quote)
        }
    }

    /// Epic (or ticker) to ticker; names outside the table lose the quote suffix
    pub fn to_symbol(&self, epic: &str) -> String {
        let upper = epic.trim().to_uppercase();
        if self.to_epic.contains_key(&upper) {
            return upper;
        }
        if let Some(symbol) = self.to_symbol.get(&upper) {
            return symbol.clone();
        }
        if self.has_quote_suffix(&upper) {
            upper[..upper.len() - self.quote.len()].to_string()
        } else {
            upper
        }
    }

    /// True if both names refer to the same instrument
    pub fn same_instrument(&self, a: &str, b: &str) -> bool {
        self.to_epic(a) == self.to_epic(b)
    }

    /// First broker position matching `symbol` in either form
    pub fn find_position<'a>(
        &self,
        positions: &'a [BrokerPosition],
        symbol: &str,
    ) -> Option<&'a BrokerPosition> {
        positions
            .iter()
            .find(|p| self.same_instrument(&p.epic, symbol))
    }

    /// First guard snapshot matching `symbol` in either form
    pub fn find_snapshot<'a>(
        &self,
        snapshots: &'a [OpenPositionSnapshot],
        symbol: &str,
    ) -> Option<&'a OpenPositionSnapshot> {
        snapshots
            .iter()
            .find(|s| self.same_instrument(&s.symbol, symbol))
    }
}
