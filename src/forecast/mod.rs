//! One-step price forecast per ticker
//!
//! Model: least-squares linear trend plus an additive time-of-day seasonal
//! profile, with an 80% interval from the residual standard deviation.
use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;

use crate::api::{resolution_for, CapitalClient, SymbolMap};
use crate::models::Candle;

/// z-score of an 80% two-sided normal interval
const Z_80: f64 = 1.2816;
const MIN_POINTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Min15,
    Hour1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 2] = [Timeframe::Min15, Timeframe::Hour1];

    pub fn interval(&self) -> &'static str {
        match self {
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
        }
    }

    /// Candles fetched for fitting
    pub fn history(&self) -> usize {
        match self {
            Timeframe::Min15 => 300,
            Timeframe::Hour1 => 500,
        }
    }

    pub fn step(&self) -> Duration {
        match self {
            Timeframe::Min15 => Duration::minutes(15),
            Timeframe::Hour1 => Duration::hours(1),
        }
    }

    /// Bars per day
    pub fn daily_period(&self) -> usize {
        match self {
            Timeframe::Min15 => 96,
            Timeframe::Hour1 => 24,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Min15 => "Next 15 Minutes",
            Timeframe::Hour1 => "Next Hour",
        }
    }
}

/// Point forecast with its interval
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub time: DateTime<Utc>,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ForecastRow {
    pub ticker: String,
    pub timeframe: String,
    pub last_price: Option<f64>,
    pub forecast: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub change_pct: Option<f64>,
    pub forecast_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl ForecastRow {
    fn from_forecast(ticker: &str, timeframe: Timeframe, last_price: f64, fc: &Forecast) -> Self {
        let change_pct = if last_price != 0.0 {
            Some(round2((fc.value - last_price) / last_price * 100.0))
        } else {
            None
        };

        Self {
            ticker: ticker.to_string(),
            timeframe: timeframe.label().to_string(),
            last_price: Some(round2(last_price)),
            forecast: Some(round2(fc.value)),
            lower: Some(round2(fc.lower)),
            upper: Some(round2(fc.upper)),
            change_pct,
            forecast_time: Some(fc.time),
            error: None,
        }
    }

    fn failed(ticker: &str, timeframe: Timeframe, error: &anyhow::Error) -> Self {
        Self {
            ticker: ticker.to_string(),
            timeframe: timeframe.label().to_string(),
            last_price: None,
            forecast: None,
            lower: None,
            upper: None,
            change_pct: None,
            forecast_time: None,
            error: Some(format!("{:#}", error)),
        }
    }
}

/// Slot of the day a timestamp falls in, for a bar length of `step`
fn day_slot(ts: DateTime<Utc>, step: Duration, period: usize) -> usize {
    let step_secs = step.num_seconds().max(1);
    let secs = i64::from(ts.num_seconds_from_midnight());
    ((secs / step_secs) as usize) % period.max(1)
}

/// Fit trend + daily seasonality on `candles` (oldest first) and predict one step ahead
pub fn fit_forecast(candles: &[Candle], step: Duration, period: usize) -> anyhow::Result<Forecast> {
    if candles.len() < MIN_POINTS {
        bail!(
            "need at least {} candles to forecast, got {}",
            MIN_POINTS,
            candles.len()
        );
    }

    let origin = candles[0].timestamp;
    let step_secs = step.num_seconds().max(1) as f64;
    let xs: Vec<f64> = candles
        .iter()
        .map(|c| (c.timestamp - origin).num_seconds() as f64 / step_secs)
        .collect();
    let ys: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let n = xs.len() as f64;

    // Least-squares trend
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    let sxy: f64 = xs
        .iter()
        .zip(ys.iter())
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = mean_y - slope * mean_x;
    let trend = |x: f64| intercept + slope * x;

    // Seasonal profile needs two full cycles
    let mut seasonal = vec![0.0; period.max(1)];
    if period > 1 && candles.len() >= period * 2 {
        let mut sums = vec![0.0; period];
        let mut counts = vec![0usize; period];
        for (c, (x, y)) in candles.iter().zip(xs.iter().zip(ys.iter())) {
            let slot = day_slot(c.timestamp, step, period);
            sums[slot] += y - trend(*x);
            counts[slot] += 1;
        }

        let observed: Vec<usize> = (0..period).filter(|&i| counts[i] > 0).collect();
        for &i in &observed {
            seasonal[i] = sums[i] / counts[i] as f64;
        }
        let avg = observed.iter().map(|&i| seasonal[i]).sum::<f64>() / observed.len() as f64;
        for &i in &observed {
            seasonal[i] -= avg;
        }
    }

    let residuals: Vec<f64> = candles
        .iter()
        .zip(xs.iter().zip(ys.iter()))
        .map(|(c, (x, y))| y - trend(*x) - seasonal[day_slot(c.timestamp, step, period)])
        .collect();
    let sigma = (residuals.iter().map(|r| r * r).sum::<f64>() / (n - 2.0)).sqrt();

    let last = candles[candles.len() - 1].timestamp;
    let time = last + step;
    let x_next = xs[xs.len() - 1] + 1.0;
    let value = trend(x_next) + seasonal[day_slot(time, step, period)];

    Ok(Forecast {
        time,
        value,
        lower: value - Z_80 * sigma,
        upper: value + Z_80 * sigma,
    })
}

/// Fetch history and forecast one ticker on one timeframe
pub async fn forecast_ticker(
    client: &CapitalClient,
    symbols: &SymbolMap,
    ticker: &str,
    timeframe: Timeframe,
) -> anyhow::Result<ForecastRow> {
    let epic = symbols.to_epic(ticker);
    let candles = client
        .fetch_candles(
            &epic,
            resolution_for(timeframe.interval()),
            timeframe.history(),
        )
        .await
        .with_context(|| format!("fetching {} candles for {}", timeframe.interval(), epic))?;

    let Some(last) = candles.last() else {
        bail!("no candles for {} {}", epic, timeframe.interval());
    };
    let fc = fit_forecast(&candles, timeframe.step(), timeframe.daily_period())?;

    Ok(ForecastRow::from_forecast(ticker, timeframe, last.close, &fc))
}

/// Forecast every ticker on 15m and 1h; failures become rows with an error
pub async fn forecast_many(
    client: &CapitalClient,
    symbols: &SymbolMap,
    tickers: &[String],
) -> Vec<ForecastRow> {
    let mut rows = Vec::new();
    for ticker in tickers {
        for timeframe in Timeframe::ALL {
            match forecast_ticker(client, symbols, ticker, timeframe).await {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Forecast failed for {} {}: {:#}",
                        ticker,
                        timeframe.interval(),
                        e
                    );
                    rows.push(ForecastRow::failed(ticker, timeframe, &e));
                }
            }
        }
    }
    rows
}

fn cell(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "N/A".to_string())
}

/// Plain-text table for the prompt
pub fn render_table(rows: &[ForecastRow]) -> String {
    let header = [
        "Ticker",
        "Timeframe",
        "Last Price",
        "Forecast",
        "Lower Bound",
        "Upper Bound",
        "Change %",
        "Forecast Time",
    ];

    let body: Vec<[String; 8]> = rows
        .iter()
        .map(|r| {
            [
                r.ticker.clone(),
                r.timeframe.clone(),
                cell(r.last_price),
                cell(r.forecast),
                cell(r.lower),
                cell(r.upper),
                cell(r.change_pct),
                r.forecast_time
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "N/A".to_string()),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in &body {
        for (w, c) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(c.chars().count());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(c, w)| format!("{:>width$}", c, width = *w))
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut out = line(header.to_vec());
    for row in &body {
        out.push('\n');
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn candles(n: usize, step: Duration, f: impl Fn(usize, DateTime<Utc>) -> f64) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let ts = start + step * i as i32;
                let close = f(i, ts);
                Candle {
                    timestamp: ts,
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 0.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_linear_trend_extrapolates() {
        let data = candles(50, Duration::hours(1), |i, _| 100.0 + 2.0 * i as f64);
        let fc = fit_forecast(&data, Duration::hours(1), 24).unwrap();

        assert!((fc.value - 200.0).abs() < 1e-6);
        assert!((fc.upper - fc.lower).abs() < 1e-6);
        assert_eq!(fc.time, data[49].timestamp + Duration::hours(1));
    }

    #[test]
    fn test_daily_seasonality_is_captured() {
        // +10 during hour 12, flat otherwise
        let data = candles(24 * 5 - 1, Duration::hours(1), |_, ts| {
            if ts.hour() == 12 {
                110.0
            } else {
                100.0
            }
        });
        // Next bar is 23:00, then check 12:00 explicitly via slot profile
        let fc = fit_forecast(&data, Duration::hours(1), 24).unwrap();
        assert_eq!(fc.time.hour(), 23);
        assert!(fc.value < 101.0);

        let upto_noon: Vec<Candle> = data
            .iter()
            .take_while(|c| !(c.timestamp.day() == 5 && c.timestamp.hour() == 12))
            .cloned()
            .collect();
        let fc = fit_forecast(&upto_noon, Duration::hours(1), 24).unwrap();
        assert_eq!(fc.time.hour(), 12);
        assert!(fc.value > 108.0);
    }

    #[test]
    fn test_interval_widens_with_noise() {
        let data = candles(120, Duration::minutes(15), |i, _| {
            100.0 + if i % 2 == 0 { 1.0 } else { -1.0 }
        });
        let fc = fit_forecast(&data, Duration::minutes(15), 96).unwrap();
        assert!(fc.lower < fc.value && fc.value < fc.upper);
        assert!(fc.upper - fc.lower > 1.0);
    }

    #[test]
    fn test_too_few_candles() {
        let data = candles(5, Duration::minutes(15), |_, _| 1.0);
        assert!(fit_forecast(&data, Duration::minutes(15), 96).is_err());
    }

    #[test]
    fn test_day_slot() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 13, 45, 0).unwrap();
        assert_eq!(day_slot(ts, Duration::minutes(15), 96), 55);
        assert_eq!(day_slot(ts, Duration::hours(1), 24), 13);
    }

    #[test]
    fn test_row_and_table() {
        let fc = Forecast {
            time: Utc.with_ymd_and_hms(2024, 6, 1, 10, 15, 0).unwrap(),
            value: 101.234,
            lower: 99.0,
            upper: 103.456,
        };
        let ok = ForecastRow::from_forecast("BTC", Timeframe::Min15, 100.0, &fc);
        assert_eq!(ok.forecast, Some(101.23));
        assert_eq!(ok.change_pct, Some(1.23));

        let err = anyhow::anyhow!("no candles");
        let failed = ForecastRow::failed("ETH", Timeframe::Hour1, &err);
        assert_eq!(failed.timeframe, "Next Hour");

        let table = render_table(&[ok.clone(), failed.clone()]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("Change %"));
        assert!(lines[1].contains("101.23"));
        assert!(lines[2].contains("N/A"));

        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error").is_none());
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["error"], "no candles");
    }
}
