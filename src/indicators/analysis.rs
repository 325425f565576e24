//! Per-ticker technical snapshot fed into the decision prompt
//!
//! Everything is computed on the 15-minute timeframe; the previous daily
//! bar only supplies the pivot levels.
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::atr::atr_series;
use super::macd::macd_histogram;
use super::moving_average::ema_series;
use super::pivots::{calculate_pivot_points, PivotPoints};
use super::rsi::rsi_series;
use crate::api::{resolution_for, CapitalClient, SymbolMap};
use crate::models::Candle;

const INTRADAY_CANDLES: usize = 200;
const LONGER_TERM_WINDOW: usize = 50;
const SERIES_TAIL: usize = 10;
const VOLUME_AVERAGE_WINDOW: usize = 20;
const ORDERBOOK_VOLUME: &str = "N/A (Capital.com)";

#[derive(Debug, Clone, Serialize)]
pub struct CurrentSnapshot {
    pub price: f64,
    pub ema20: Option<f64>,
    pub macd: Option<f64>,
    pub rsi_7: Option<f64>,
}

/// Funding / open interest are not available on a CFD broker; always zero
#[derive(Debug, Clone, Default, Serialize)]
pub struct Derivatives {
    pub open_interest_latest: f64,
    pub open_interest_average: f64,
    pub funding_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntradaySeries {
    pub mid_prices: Vec<f64>,
    pub ema_20: Vec<Option<f64>>,
    pub macd: Vec<Option<f64>>,
    pub rsi_7: Vec<Option<f64>>,
    pub rsi_14: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LongerTermContext {
    pub ema_20_current: Option<f64>,
    pub ema_50_current: Option<f64>,
    pub atr_3_current: Option<f64>,
    pub atr_14_current: Option<f64>,
    pub volume_current: f64,
    pub volume_average: f64,
    pub macd_series: Vec<Option<f64>>,
    pub rsi_14_series: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickerAnalysis {
    pub ticker: String,
    pub timestamp: String,
    pub current: CurrentSnapshot,
    pub volume: String,
    pub pivot_points: PivotPoints,
    pub derivatives: Derivatives,
    pub intraday: IntradaySeries,
    pub longer_term_15m: LongerTermContext,
}

fn tail<T: Clone>(values: &[T], n: usize) -> Vec<T> {
    values[values.len().saturating_sub(n)..].to_vec()
}

fn last<T: Copy>(values: &[Option<T>]) -> Option<T> {
    values.last().copied().flatten()
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", decimals, v),
        None => "nan".to_string(),
    }
}

fn fmt_series(values: &[Option<f64>], decimals: usize) -> String {
    let items: Vec<String> = values.iter().map(|v| fmt_opt(*v, decimals)).collect();
    format!("[{}]", items.join(", "))
}

impl TickerAnalysis {
    /// Build the analysis from 15m candles (oldest first) and recent daily candles
    pub fn from_candles(
        ticker: &str,
        candles: &[Candle],
        daily: &[Candle],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let Some(latest) = candles.last() else {
            bail!("no 15m candles for {}", ticker);
        };

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let ema_20 = ema_series(&closes, 20);
        let macd = macd_histogram(&closes);
        let rsi_7 = rsi_series(&closes, 7);
        let rsi_14 = rsi_series(&closes, 14);

        // Longer-term context is recomputed on the last 50 bars only
        let window = &candles[candles.len().saturating_sub(LONGER_TERM_WINDOW)..];
        let window_closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        let lt_macd = macd_histogram(&window_closes);
        let lt_rsi_14 = rsi_series(&window_closes, 14);
        let volumes: Vec<f64> = window.iter().map(|c| c.volume).collect();
        let recent_volumes = tail(&volumes, VOLUME_AVERAGE_WINDOW);
        let volume_average = if recent_volumes.is_empty() {
            0.0
        } else {
            recent_volumes.iter().sum::<f64>() / recent_volumes.len() as f64
        };

        let pivot_bar = if daily.len() >= 2 {
            &daily[daily.len() - 2]
        } else {
            latest
        };

        Ok(Self {
            ticker: ticker.to_string(),
            timestamp: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            current: CurrentSnapshot {
                price: latest.close,
                ema20: last(&ema_20),
                macd: last(&macd),
                rsi_7: last(&rsi_7),
            },
            volume: ORDERBOOK_VOLUME.to_string(),
            pivot_points: calculate_pivot_points(pivot_bar.high, pivot_bar.low, pivot_bar.close),
            derivatives: Derivatives::default(),
            intraday: IntradaySeries {
                mid_prices: tail(&closes, SERIES_TAIL),
                ema_20: tail(&ema_20, SERIES_TAIL),
                macd: tail(&macd, SERIES_TAIL),
                rsi_7: tail(&rsi_7, SERIES_TAIL),
                rsi_14: tail(&rsi_14, SERIES_TAIL),
            },
            longer_term_15m: LongerTermContext {
                ema_20_current: last(&ema_series(&window_closes, 20)),
                ema_50_current: last(&ema_series(&window_closes, 50)),
                atr_3_current: last(&atr_series(window, 3)),
                atr_14_current: last(&atr_series(window, 14)),
                volume_current: volumes.last().copied().unwrap_or(0.0),
                volume_average,
                macd_series: tail(&lt_macd, SERIES_TAIL),
                rsi_14_series: tail(&lt_rsi_14, SERIES_TAIL),
            },
        })
    }

    /// Render the `<TICKER_data>` block
    pub fn format_prompt_block(&self) -> String {
        let cur = &self.current;
        let pivot = &self.pivot_points;
        let intra = &self.intraday;
        let lt = &self.longer_term_15m;
        let mids: Vec<Option<f64>> = intra.mid_prices.iter().copied().map(Some).collect();

        let mut out = format!("\n<{}_data>\n", self.ticker);
        out.push_str(&format!(
            "Timestamp: {} (UTC) (Capital.com, 15m)\n\n",
            self.timestamp
        ));
        out.push_str(&format!(
            "current_price = {:.1}, current_ema20 = {}, current_macd = {}, current_rsi (7 period) = {}\n\n",
            cur.price,
            fmt_opt(cur.ema20, 3),
            fmt_opt(cur.macd, 3),
            fmt_opt(cur.rsi_7, 3)
        ));
        out.push_str(&format!("Volume: {}\n\n", self.volume));

        out.push_str("Pivot Points (based on previous day):\n");
        out.push_str(&format!(
            "R2 = {:.2}, R1 = {:.2}, PP = {:.2}, S1 = {:.2}, S2 = {:.2}\n\n",
            pivot.r2, pivot.r1, pivot.pp, pivot.s1, pivot.s2
        ));

        out.push_str("Intraday series (15m, oldest → latest):\n");
        out.push_str(&format!("Mid prices: {}\n", fmt_series(&mids, 1)));
        out.push_str(&format!(
            "EMA indicators (20-period): {}\n",
            fmt_series(&intra.ema_20, 3)
        ));
        out.push_str(&format!("MACD indicators: {}\n", fmt_series(&intra.macd, 3)));
        out.push_str(&format!(
            "RSI indicators (7-Period): {}\n",
            fmt_series(&intra.rsi_7, 3)
        ));
        out.push_str(&format!(
            "RSI indicators (14-Period): {}\n\n",
            fmt_series(&intra.rsi_14, 3)
        ));

        out.push_str("Longer-term context (still 15-minute timeframe, wider window):\n");
        out.push_str(&format!(
            "20-Period EMA: {} vs. 50-Period EMA: {}\n",
            fmt_opt(lt.ema_20_current, 3),
            fmt_opt(lt.ema_50_current, 3)
        ));
        out.push_str(&format!(
            "3-Period ATR: {} vs. 14-Period ATR: {}\n",
            fmt_opt(lt.atr_3_current, 3),
            fmt_opt(lt.atr_14_current, 3)
        ));
        out.push_str(&format!(
            "Current Volume: {:.3} vs. Average Volume: {:.3}\n",
            lt.volume_current, lt.volume_average
        ));
        out.push_str(&format!("MACD indicators: {}\n", fmt_series(&lt.macd_series, 3)));
        out.push_str(&format!(
            "RSI indicators (14-Period): {}\n",
            fmt_series(&lt.rsi_14_series, 3)
        ));
        out.push_str(&format!("</{}_data>\n", self.ticker));
        out
    }
}

/// Fetch candles for one ticker and analyse them
pub async fn analyze_ticker(
    client: &CapitalClient,
    symbols: &SymbolMap,
    ticker: &str,
) -> anyhow::Result<TickerAnalysis> {
    let epic = symbols.to_epic(ticker);

    let candles = client
        .fetch_candles(&epic, resolution_for("15m"), INTRADAY_CANDLES)
        .await
        .with_context(|| format!("fetching 15m candles for {}", epic))?;
    if candles.is_empty() {
        bail!("no candles received from Capital.com for {}", epic);
    }

    let daily = match client.fetch_candles(&epic, resolution_for("1d"), 2).await {
        Ok(daily) => daily,
        Err(e) => {
            tracing::warn!("⚠️ Daily candles unavailable for {}: {}", epic, e);
            Vec::new()
        }
    };

    TickerAnalysis::from_candles(&ticker.to_uppercase(), &candles, &daily, Utc::now())
}

/// Analyse several tickers; failures are logged and skipped
///
/// Returns the concatenated prompt text and the per-ticker data.
pub async fn analyze_tickers(
    client: &CapitalClient,
    symbols: &SymbolMap,
    tickers: &[String],
) -> (String, Vec<TickerAnalysis>) {
    let mut text = String::new();
    let mut analyses = Vec::new();

    for ticker in tickers {
        match analyze_ticker(client, symbols, ticker).await {
            Ok(analysis) => {
                text.push_str(&analysis.format_prompt_block());
                analyses.push(analysis);
            }
            Err(e) => tracing::warn!("⚠️ Analysis failed for {}: {:#}", ticker, e),
        }
    }

    (text, analyses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn series(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.1;
                Candle {
                    timestamp: start + Duration::minutes(15 * i as i64),
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 10.0 + i as f64,
                }
            })
            .collect()
    }

    fn daily() -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap();
        vec![
            Candle {
                timestamp: start,
                open: 95.0,
                high: 110.0,
                low: 90.0,
                close: 100.0,
                volume: 0.0,
            },
            Candle {
                timestamp: start + Duration::days(1),
                open: 100.0,
                high: 200.0,
                low: 50.0,
                close: 150.0,
                volume: 0.0,
            },
        ]
    }

    #[test]
    fn test_full_analysis() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let a = TickerAnalysis::from_candles("BTC", &series(200), &daily(), now).unwrap();

        assert_eq!(a.timestamp, "2024-06-03 12:00:00");
        assert_eq!(a.intraday.mid_prices.len(), 10);
        assert!(a.intraday.macd.iter().all(Option::is_some));
        assert!(a.current.rsi_7.is_some());
        assert!(a.longer_term_15m.ema_50_current.is_some());
        assert!(a.longer_term_15m.atr_14_current.is_some());
        assert!(a.longer_term_15m.macd_series.iter().all(Option::is_some));
        assert_eq!(a.derivatives.funding_rate, 0.0);
        // Previous (not current) daily bar
        assert_eq!(a.pivot_points.pp, 100.0);
        // Average of the last 20 volumes: 190..=209
        assert!((a.longer_term_15m.volume_average - 199.5).abs() < 1e-9);
    }

    #[test]
    fn test_pivots_fall_back_to_last_candle() {
        let candles = series(60);
        let a = TickerAnalysis::from_candles("ETH", &candles, &[], Utc::now()).unwrap();
        let last = candles.last().unwrap();
        let expected = (last.high + last.low + last.close) / 3.0;
        assert!((a.pivot_points.pp - expected).abs() < 1e-9);
    }

    #[test]
    fn test_short_history_uses_nan_placeholders() {
        let a = TickerAnalysis::from_candles("SOL", &series(5), &[], Utc::now()).unwrap();
        assert!(a.current.ema20.is_none());
        let block = a.format_prompt_block();
        assert!(block.contains("current_ema20 = nan"));
    }

    #[test]
    fn test_no_candles_is_error() {
        assert!(TickerAnalysis::from_candles("BTC", &[], &[], Utc::now()).is_err());
    }

    #[test]
    fn test_prompt_block_layout() {
        let a = TickerAnalysis::from_candles("BTC", &series(200), &daily(), Utc::now()).unwrap();
        let block = a.format_prompt_block();

        assert!(block.starts_with("\n<BTC_data>\n"));
        assert!(block.ends_with("</BTC_data>\n"));
        assert!(block.contains("Volume: N/A (Capital.com)"));
        assert!(block.contains("R2 = 120.00, R1 = 110.00, PP = 100.00, S1 = 90.00, S2 = 80.00"));
        assert!(block.contains("Intraday series (15m, oldest → latest):"));
    }

    #[test]
    fn test_fmt_series() {
        assert_eq!(fmt_series(&[Some(1.23456), None], 2), "[1.23, nan]");
        assert_eq!(fmt_series(&[], 3), "[]");
    }
}
