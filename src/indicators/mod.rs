// Technical indicators module
// EMA, RSI, MACD, ATR and pivot points on 15m candles

pub mod analysis;
pub mod atr;
pub mod macd;
pub mod moving_average;
pub mod pivots;
pub mod rsi;

pub use analysis::{analyze_ticker, analyze_tickers, TickerAnalysis};
pub use atr::{atr_series, calculate_atr};
pub use macd::{macd_histogram, macd_series, MacdPoint};
pub use moving_average::{calculate_ema, calculate_sma, ema_series};
pub use pivots::{calculate_pivot_points, PivotPoints};
pub use rsi::{calculate_rsi, rsi_series};
