use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a decision's `reason` field
pub const MAX_REASON_CHARS: usize = 300;

/// What the decision source wants to do this cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Open,
    Close,
    Hold,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Open => "open",
            Operation::Close => "close",
            Operation::Hold => "hold",
        }
    }
}

/// Trade direction (long = price goes up)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    /// Broker-side order direction
    pub fn order_side(&self) -> &'static str {
        match self {
            Direction::Long => "BUY",
            Direction::Short => "SELL",
        }
    }
}

/// Trading decision produced once per cycle by the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedAction {
    pub operation: Operation,
    pub symbol: String,
    pub direction: Direction,
    /// Fraction of balance (open) or position (close), 0.0..=1.0
    pub target_portion_of_balance: f64,
    /// Leverage multiplier, 1..=10
    pub leverage: u32,
    pub reason: String,
}

/// Read-only view of an open position, as seen by the hold guard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenPositionSnapshot {
    pub symbol: String,
    /// ISO-8601 open time as reported by the broker (may be missing)
    pub opened_at: Option<String>,
    pub pnl_percent: Option<f64>,
}

/// OHLCV candlestick (bid side)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Open position as reported by the broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerPosition {
    pub deal_id: String,
    pub deal_reference: Option<String>,
    pub epic: String,
    /// "BUY" or "SELL"
    pub direction: String,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: Option<f64>,
    pub stop_level: Option<f64>,
    pub profit_level: Option<f64>,
    pub trailing_stop: bool,
    pub guaranteed_stop: bool,
    /// Unrealized P&L in account currency
    pub upl: f64,
    pub created_at: Option<String>,
    pub leverage: Option<f64>,
    pub currency: Option<String>,
}

impl BrokerPosition {
    pub fn side(&self) -> Direction {
        if self.direction == "SELL" {
            Direction::Short
        } else {
            Direction::Long
        }
    }

    /// Unrealized P&L as a percentage of entry notional
    pub fn pnl_percent(&self) -> Option<f64> {
        let notional = self.entry_price * self.size;
        if notional.abs() < f64::EPSILON {
            return None;
        }
        Some(self.upl / notional * 100.0)
    }

    pub fn to_snapshot(&self) -> OpenPositionSnapshot {
        OpenPositionSnapshot {
            symbol: self.epic.clone(),
            opened_at: self.created_at.clone(),
            pnl_percent: self.pnl_percent(),
        }
    }
}

/// Balance figures for the active account
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccountStatus {
    pub balance: f64,
    pub equity: f64,
    pub pnl: f64,
    pub available: f64,
    pub currency: String,
    pub account_name: String,
}

/// Account status plus positions, serialised into the LLM prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    #[serde(flatten)]
    pub account: AccountStatus,
    pub positions: Vec<BrokerPosition>,
}

/// Parse a broker timestamp into UTC.
///
/// Accepts RFC 3339 (with `Z` or an offset) and naive ISO-8601, which is
/// taken to be UTC.
pub fn parse_utc_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
}
