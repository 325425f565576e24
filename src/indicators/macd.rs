use super::moving_average::ema_raw;

const FAST: usize = 12;
const SLOW: usize = 26;
const SIGNAL: usize = 9;

/// MACD line, signal line and histogram for one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD (12, 26, 9) aligned with `prices`
///
/// The first `SLOW + SIGNAL - 2` bars are warm-up and yield `None`.
pub fn macd_series(prices: &[f64]) -> Vec<Option<MacdPoint>> {
    let fast = ema_raw(prices, FAST);
    let slow = ema_raw(prices, SLOW);

    let line: Vec<f64> = fast
        .iter()
        .zip(slow.iter())
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => f - s,
            _ => 0.0,
        })
        .collect();

    let signal = ema_raw(&line, SIGNAL);
    let warmup = SLOW + SIGNAL - 2;

    line.iter()
        .zip(signal.iter())
        .enumerate()
        .map(|(i, (macd, signal))| {
            let signal = (*signal)?;
            (i >= warmup).then(|| MacdPoint {
                macd: *macd,
                signal,
                histogram: macd - signal,
            })
        })
        .collect()
}

/// Histogram series (MACD minus signal), the value shown to the model
pub fn macd_histogram(prices: &[f64]) -> Vec<Option<f64>> {
    macd_series(prices)
        .into_iter()
        .map(|p| p.map(|p| p.histogram))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_prices_have_zero_histogram() {
        let prices = vec![50.0; 60];
        let hist = macd_histogram(&prices);
        assert_eq!(hist.len(), 60);
        assert!(hist[..33].iter().all(Option::is_none));
        assert!(hist[33..].iter().all(|h| h.unwrap().abs() < 1e-9));
    }

    #[test]
    fn test_uptrend_has_positive_macd() {
        let prices: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let last = macd_series(&prices).last().copied().flatten().unwrap();
        assert!(last.macd > 0.0);
        assert!((last.histogram - (last.macd - last.signal)).abs() < 1e-12);
    }

    #[test]
    fn test_short_series_is_all_warmup() {
        let prices: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert!(macd_histogram(&prices).iter().all(Option::is_none));
    }
}
