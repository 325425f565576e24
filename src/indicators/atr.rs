//! Average True Range (ATR) indicator
//!
//! True Range is the greatest of high - low, |high - prev close| and
//! |low - prev close|. The first ATR is the simple mean of the first
//! `period` true ranges, then Wilder's smoothing.
use crate::models::Candle;

fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs())
        })
        .collect()
}

/// Current ATR, or None if insufficient data
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    atr_series(candles, period).last().copied().flatten()
}

/// ATR aligned with `candles`; `None` until `period` true ranges exist
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; candles.len()];
    let ranges = true_ranges(candles);
    if period == 0 || ranges.len() < period {
        return series;
    }

    let mut atr = ranges[..period].iter().sum::<f64>() / period as f64;
    // ranges[i] belongs to candles[i + 1]
    series[period] = Some(atr);

    for (i, tr) in ranges.iter().enumerate().skip(period) {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
        series[i + 1] = Some(atr);
    }

    series
}
