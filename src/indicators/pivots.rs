use serde::{Deserialize, Serialize};

/// Classic floor-trader pivot levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PivotPoints {
    pub pp: f64,
    pub s1: f64,
    pub s2: f64,
    pub r1: f64,
    pub r2: f64,
}

/// Pivot levels from a bar's high / low / close (normally the previous day)
pub fn calculate_pivot_points(high: f64, low: f64, close: f64) -> PivotPoints {
    let pp = (high + low + close) / 3.0;
    PivotPoints {
        pp,
        s1: 2.0 * pp - high,
        s2: pp - (high - low),
        r1: 2.0 * pp - low,
        r2: pp + (high - low),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pivot_levels() {
        let p = calculate_pivot_points(110.0, 90.0, 100.0);
        assert_eq!(p.pp, 100.0);
        assert_eq!(p.r1, 110.0);
        assert_eq!(p.s1, 90.0);
        assert_eq!(p.r2, 120.0);
        assert_eq!(p.s2, 80.0);
    }
}
