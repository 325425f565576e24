use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{parse_utc_timestamp, OpenPositionSnapshot, Operation, ProposedAction};

/// Prefix written into the reason of a close that was turned into a hold
pub const OVERRIDE_PREFIX: &str = "[ANTI-OVERTRADING] Position too young. Original: ";
const ORIGINAL_REASON_CHARS: usize = 100;

/// Thresholds for the anti-overtrading guard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoldGuardConfig {
    /// Minimum time a position is held before a discretionary close
    pub min_hold_minutes: f64,
    /// PnL percent at/below which a close is always allowed
    pub stop_loss_pct: f64,
    /// PnL percent at/above which a close is always allowed
    pub take_profit_pct: f64,
}

impl Default for HoldGuardConfig {
    fn default() -> Self {
        Self {
            min_hold_minutes: 60.0,
            stop_loss_pct: -3.0,
            take_profit_pct: 2.0,
        }
    }
}

/// Result of running the guard over a proposed action
#[derive(Debug, Clone, PartialEq)]
pub struct GuardOutcome {
    /// The action to execute (operation downgraded to hold if blocked)
    pub action: ProposedAction,
    pub allowed: bool,
    /// Informational only, never stored on the action
    pub override_reason: Option<String>,
}

impl GuardOutcome {
    fn pass(action: ProposedAction, reason: Option<String>) -> Self {
        Self {
            action,
            allowed: true,
            override_reason: reason,
        }
    }
}

/// Blocks a close on a position that was opened too recently, unless
/// stop-loss or take-profit thresholds have been crossed.
///
/// Every path that cannot decide (missing open time, unparsable timestamp)
/// allows the close so a position is never stranded.
#[derive(Debug, Clone, Default)]
pub struct HoldGuard {
    config: HoldGuardConfig,
}

impl HoldGuard {
    pub fn new(config: HoldGuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HoldGuardConfig {
        &self.config
    }

    /// Evaluate against the current wall clock
    pub fn evaluate(
        &self,
        action: ProposedAction,
        position: Option<&OpenPositionSnapshot>,
    ) -> GuardOutcome {
        self.evaluate_at(action, position, Utc::now())
    }

    /// Evaluate with an explicit "now"
    pub fn evaluate_at(
        &self,
        mut action: ProposedAction,
        position: Option<&OpenPositionSnapshot>,
        now: DateTime<Utc>,
    ) -> GuardOutcome {
        if action.operation != Operation::Close {
            return GuardOutcome::pass(action, None);
        }

        // Nothing to protect
        let Some(position) = position else {
            return GuardOutcome::pass(action, None);
        };

        let pnl_pct = position.pnl_percent.unwrap_or(0.0);

        if pnl_pct <= self.config.stop_loss_pct {
            let reason = format!("Stop loss triggered (PnL: {:.2}%)", pnl_pct);
            tracing::info!("   ✅ Close allowed: {}", reason);
            return GuardOutcome::pass(action, Some(reason));
        }

        if pnl_pct >= self.config.take_profit_pct {
            let reason = format!("Take profit triggered (PnL: {:.2}%)", pnl_pct);
            tracing::info!("   ✅ Close allowed: {}", reason);
            return GuardOutcome::pass(action, Some(reason));
        }

        let Some(raw_opened_at) = position.opened_at.as_deref() else {
            // Age unknown: fail open
            tracing::debug!("No open time for {}, allowing close", position.symbol);
            return GuardOutcome::pass(action, None);
        };

        let Some(opened_at) = parse_utc_timestamp(raw_opened_at) else {
            tracing::warn!(
                "   ⚠️ Could not parse open time {:?} for {}, allowing close",
                raw_opened_at,
                position.symbol
            );
            return GuardOutcome::pass(action, None);
        };

        let minutes_held = (now - opened_at).num_milliseconds() as f64 / 60_000.0;

        if minutes_held >= self.config.min_hold_minutes {
            let reason = format!(
                "Position held for {:.0} min (>= {} min)",
                minutes_held, self.config.min_hold_minutes
            );
            tracing::info!("   ✅ Close allowed: {}", reason);
            return GuardOutcome::pass(action, Some(reason));
        }

        tracing::info!(
            "   ⏳ ANTI-OVERTRADING: {} open for {:.0} min (minimum {} min)",
            position.symbol,
            minutes_held,
            self.config.min_hold_minutes
        );
        tracing::info!(
            "      PnL: {:.2}% (stop loss: {}%, take profit: {}%)",
            pnl_pct,
            self.config.stop_loss_pct,
            self.config.take_profit_pct
        );
        tracing::info!("   🛑 OVERRIDE: close -> hold");

        let original: String = action.reason.chars().take(ORIGINAL_REASON_CHARS).collect();
        action.operation = Operation::Hold;
        action.reason = format!("{}{}", OVERRIDE_PREFIX, original);

        GuardOutcome {
            action,
            allowed: false,
            override_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn close_action(reason: &str) -> ProposedAction {
        ProposedAction {
            operation: Operation::Close,
            symbol: "BTC".to_string(),
            direction: Direction::Long,
            target_portion_of_balance: 1.0,
            leverage: 3,
            reason: reason.to_string(),
        }
    }

    fn position(minutes_ago: Option<i64>, pnl: Option<f64>) -> OpenPositionSnapshot {
        OpenPositionSnapshot {
            symbol: "BTCUSD".to_string(),
            opened_at: minutes_ago.map(|m| (now() - Duration::minutes(m)).to_rfc3339()),
            pnl_percent: pnl,
        }
    }

    #[test]
    fn test_stop_loss_allows_young_position() {
        let guard = HoldGuard::default();
        let pos = position(Some(5), Some(-4.2));

        let outcome = guard.evaluate_at(close_action("cut losses"), Some(&pos), now());

        assert!(outcome.allowed);
        assert_eq!(outcome.action.operation, Operation::Close);
        assert_eq!(
            outcome.override_reason.as_deref(),
            Some("Stop loss triggered (PnL: -4.20%)")
        );
    }

    #[test]
    fn test_take_profit_allows_young_position() {
        let guard = HoldGuard::default();
        let pos = position(Some(1), Some(2.5));

        let outcome = guard.evaluate_at(close_action("bank it"), Some(&pos), now());

        assert!(outcome.allowed);
        assert_eq!(
            outcome.override_reason.as_deref(),
            Some("Take profit triggered (PnL: 2.50%)")
        );
    }

    #[test]
    fn test_young_position_is_held() {
        let guard = HoldGuard::default();
        let pos = position(Some(30), Some(0.4));

        let outcome = guard.evaluate_at(close_action("momentum fading"), Some(&pos), now());

        assert!(!outcome.allowed);
        assert!(outcome.override_reason.is_none());
        assert_eq!(outcome.action.operation, Operation::Hold);
        assert_eq!(
            outcome.action.reason,
            "[ANTI-OVERTRADING] Position too young. Original: momentum fading"
        );
        // Everything else is untouched
        assert_eq!(outcome.action.symbol, "BTC");
        assert_eq!(outcome.action.leverage, 3);
    }

    #[test]
    fn test_old_position_can_close() {
        let guard = HoldGuard::default();
        let pos = position(Some(61), Some(-1.0));

        let outcome = guard.evaluate_at(close_action("trend reversed"), Some(&pos), now());

        assert!(outcome.allowed);
        assert_eq!(outcome.action.operation, Operation::Close);
        assert_eq!(outcome.action.reason, "trend reversed");
        assert_eq!(
            outcome.override_reason.as_deref(),
            Some("Position held for 61 min (>= 60 min)")
        );
    }

    #[test]
    fn test_missing_open_time_allows_close() {
        let guard = HoldGuard::default();
        let pos = position(None, Some(0.0));

        let outcome = guard.evaluate_at(close_action("exit"), Some(&pos), now());

        assert!(outcome.allowed);
        assert!(outcome.override_reason.is_none());
        assert_eq!(outcome.action.operation, Operation::Close);
    }

    #[test]
    fn test_unparsable_open_time_fails_open() {
        let guard = HoldGuard::default();
        let pos = OpenPositionSnapshot {
            symbol: "BTCUSD".to_string(),
            opened_at: Some("yesterday-ish".to_string()),
            pnl_percent: Some(0.1),
        };

        let outcome = guard.evaluate_at(close_action("exit"), Some(&pos), now());

        assert!(outcome.allowed);
        assert_eq!(outcome.action.operation, Operation::Close);
    }

    #[test]
    fn test_no_matching_position_allows_close() {
        let guard = HoldGuard::default();
        let outcome = guard.evaluate_at(close_action("exit"), None, now());

        assert!(outcome.allowed);
        assert_eq!(outcome.action, close_action("exit"));
    }

    #[test]
    fn test_missing_pnl_defaults_to_zero() {
        let guard = HoldGuard::default();
        let pos = position(Some(10), None);

        let outcome = guard.evaluate_at(close_action("exit"), Some(&pos), now());

        assert!(!outcome.allowed);
    }

    #[test]
    fn test_non_close_operations_pass_through() {
        let guard = HoldGuard::default();
        let pos = position(Some(1), Some(0.0));

        for op in [Operation::Open, Operation::Hold] {
            let mut action = close_action("whatever");
            action.operation = op;
            let outcome = guard.evaluate_at(action.clone(), Some(&pos), now());
            assert!(outcome.allowed);
            assert_eq!(outcome.action, action);
        }
    }

    #[test]
    fn test_second_evaluation_does_not_double_prefix() {
        let guard = HoldGuard::default();
        let pos = position(Some(10), Some(0.0));

        let first = guard.evaluate_at(close_action("exit"), Some(&pos), now());
        let second = guard.evaluate_at(first.action.clone(), Some(&pos), now());

        assert_eq!(second.action, first.action);
        assert_eq!(second.action.reason.matches("[ANTI-OVERTRADING]").count(), 1);
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let guard = HoldGuard::default();

        let at_stop = position(Some(1), Some(-3.0));
        assert!(guard.evaluate_at(close_action("x"), Some(&at_stop), now()).allowed);

        let at_take = position(Some(1), Some(2.0));
        assert!(guard.evaluate_at(close_action("x"), Some(&at_take), now()).allowed);

        let at_hold = position(Some(60), Some(0.0));
        let outcome = guard.evaluate_at(close_action("x"), Some(&at_hold), now());
        assert!(outcome.allowed);
        assert_eq!(
            outcome.override_reason.as_deref(),
            Some("Position held for 60 min (>= 60 min)")
        );
    }

    #[test]
    fn test_original_reason_truncated_to_100_chars() {
        let guard = HoldGuard::default();
        let pos = position(Some(5), Some(0.0));
        let long_reason = "é".repeat(250);

        let outcome = guard.evaluate_at(close_action(&long_reason), Some(&pos), now());

        let kept = outcome.action.reason.strip_prefix(OVERRIDE_PREFIX).unwrap();
        assert_eq!(kept.chars().count(), 100);
    }

    #[test]
    fn test_custom_config() {
        let guard = HoldGuard::new(HoldGuardConfig {
            min_hold_minutes: 15.0,
            stop_loss_pct: -1.0,
            take_profit_pct: 1.0,
        });

        let pos = position(Some(20), Some(0.0));
        assert!(guard.evaluate_at(close_action("x"), Some(&pos), now()).allowed);

        let pos = position(Some(5), Some(-1.0));
        assert!(guard.evaluate_at(close_action("x"), Some(&pos), now()).allowed);

        let pos = position(Some(5), Some(0.5));
        assert!(!guard.evaluate_at(close_action("x"), Some(&pos), now()).allowed);
    }

    #[test]
    fn test_snapshot_not_mutated() {
        let guard = HoldGuard::default();
        let pos = position(Some(5), Some(0.0));
        let before = pos.clone();

        let _ = guard.evaluate_at(close_action("x"), Some(&pos), now());

        assert_eq!(pos, before);
    }
}
