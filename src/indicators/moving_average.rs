use yata::methods::EMA;
use yata::prelude::*;

/// Calculate Simple Moving Average (SMA)
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA), last value only
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).last().copied().flatten()
}

/// EMA over the whole series, seeded with the first price
///
/// Entries before `period - 1` are `None` (warm-up), matching the usual
/// `min_periods = period` convention of charting libraries.
pub fn ema_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let raw = ema_raw(prices, period);
    raw.into_iter()
        .enumerate()
        .map(|(i, v)| if i + 1 >= period { v } else { None })
        .collect()
}

/// EMA without warm-up masking; `None` only if the period is invalid
pub(crate) fn ema_raw(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let Some(first) = prices.first() else {
        return Vec::new();
    };
    let method = u8::try_from(period)
        .ok()
        .filter(|p| *p > 0)
        .and_then(|p| EMA::new(p, first).ok());

    match method {
        Some(mut ema) => prices.iter().map(|p| Some(ema.next(p))).collect(),
        None => vec![None; prices.len()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        let sma = calculate_sma(&prices, 5);
        assert_eq!(sma, Some(104.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        let sma = calculate_sma(&prices, 5);
        assert!(sma.is_none());
    }

    #[test]
    fn test_ema_follows_trend() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0];
        let ema = calculate_ema(&prices, 5).unwrap();
        assert!(ema > 104.0 && ema < 110.0);
    }

    #[test]
    fn test_ema_series_warmup() {
        let prices = vec![10.0; 8];
        let series = ema_series(&prices, 5);
        assert_eq!(series.len(), 8);
        assert!(series[..4].iter().all(Option::is_none));
        for v in &series[4..] {
            assert!((v.unwrap() - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_ema_invalid_period() {
        assert!(calculate_ema(&[1.0, 2.0], 0).is_none());
        assert!(ema_series(&[], 5).is_empty());
        assert!(calculate_ema(&[1.0; 300], 300).is_none());
    }
}
