use aitrader::api::{validate_decision, RawDecision, SymbolMap};
use aitrader::models::{BrokerPosition, Direction, Operation, OpenPositionSnapshot};
use aitrader::prompt::{market_info_block, render_system_prompt};
use aitrader::risk::hold_guard::OVERRIDE_PREFIX;
use aitrader::risk::{HoldGuard, HoldGuardConfig};
use chrono::{Duration, TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};

fn raw_close(symbol: &str, reason: &str) -> RawDecision {
    RawDecision {
        operation: Operation::Close,
        symbol: symbol.to_string(),
        direction: Direction::Long,
        target_portion_of_balance: 1.0,
        leverage: 1.0,
        reason: reason.to_string(),
    }
}

fn broker_position(epic: &str, created_at: &str, upl: f64) -> BrokerPosition {
    BrokerPosition {
        deal_id: format!("deal-{}", epic),
        deal_reference: None,
        epic: epic.to_string(),
        direction: "BUY".to_string(),
        size: 1.0,
        entry_price: 100.0,
        mark_price: Some(100.0 + upl),
        stop_level: None,
        profit_level: None,
        trailing_stop: false,
        guaranteed_stop: false,
        upl,
        created_at: Some(created_at.to_string()),
        leverage: None,
        currency: Some("USD".to_string()),
    }
}

#[test]
fn test_young_position_close_becomes_hold() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let symbols = SymbolMap::default();
    // Opened 20 minutes ago, up 0.5%
    let positions = vec![broker_position("BTCUSD", "2024-06-01T11:40:00", 0.5)];
    let snapshots: Vec<OpenPositionSnapshot> = positions.iter().map(|p| p.to_snapshot()).collect();

    let action = validate_decision(raw_close("btc", "Momentum fading"));
    let matching = symbols.find_snapshot(&snapshots, &action.symbol);
    assert!(matching.is_some());

    let outcome = HoldGuard::default().evaluate_at(action, matching, now);

    assert!(!outcome.allowed);
    assert_eq!(outcome.action.operation, Operation::Hold);
    assert_eq!(
        outcome.action.reason,
        format!("{}Momentum fading", OVERRIDE_PREFIX)
    );
    // Untouched fields survive the rewrite
    assert_eq!(outcome.action.symbol, "BTC");
    assert_eq!(outcome.action.target_portion_of_balance, 1.0);
}

#[test]
fn test_guard_covers_position_outside_configured_tickers() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let symbols = SymbolMap::from_pairs(&[("BTC", "BTCUSD")]);
    let positions = vec![broker_position("ETHUSD", "2024-06-01T11:50:00Z", 0.1)];
    let snapshots: Vec<OpenPositionSnapshot> = positions.iter().map(|p| p.to_snapshot()).collect();

    let action = validate_decision(raw_close("ETH", "Take the small win"));
    let outcome =
        HoldGuard::default().evaluate_at(action, symbols.find_snapshot(&snapshots, "ETH"), now);

    assert!(!outcome.allowed);
    assert_eq!(outcome.action.operation, Operation::Hold);
}

#[test]
fn test_losing_position_close_goes_through() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let symbols = SymbolMap::default();
    let positions = vec![broker_position("ETHUSD", "2024-06-01T11:55:00Z", -3.5)];
    let snapshots: Vec<OpenPositionSnapshot> = positions.iter().map(|p| p.to_snapshot()).collect();

    let action = validate_decision(raw_close("ETH", "Cut the loss"));
    let outcome =
        HoldGuard::default().evaluate_at(action, symbols.find_snapshot(&snapshots, "ETH"), now);

    assert!(outcome.allowed);
    assert_eq!(outcome.action.operation, Operation::Close);
    assert_eq!(
        outcome.override_reason.as_deref(),
        Some("Stop loss triggered (PnL: -3.50%)")
    );
}

#[test]
fn test_close_on_unknown_symbol_is_left_to_executor() {
    let symbols = SymbolMap::default();
    let snapshots = vec![OpenPositionSnapshot {
        symbol: "BTCUSD".to_string(),
        opened_at: Some(Utc::now().to_rfc3339()),
        pnl_percent: Some(0.0),
    }];

    let action = validate_decision(raw_close("SOL", "Exit"));
    let outcome = HoldGuard::default().evaluate(action, symbols.find_snapshot(&snapshots, "SOL"));

    assert!(outcome.allowed);
    assert_eq!(outcome.action.operation, Operation::Close);
    assert!(outcome.override_reason.is_none());
}

#[test]
fn test_custom_thresholds_and_idempotence() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let guard = HoldGuard::new(HoldGuardConfig {
        min_hold_minutes: 30.0,
        stop_loss_pct: -1.0,
        take_profit_pct: 1.0,
    });
    let snapshot = OpenPositionSnapshot {
        symbol: "SOLUSD".to_string(),
        opened_at: Some((now - Duration::minutes(10)).to_rfc3339()),
        pnl_percent: Some(0.2),
    };

    let first = guard.evaluate_at(validate_decision(raw_close("SOL", "x")), Some(&snapshot), now);
    assert!(!first.allowed);

    let second = guard.evaluate_at(first.action.clone(), Some(&snapshot), now);
    assert!(second.allowed);
    assert_eq!(second.action, first.action);

    let later = now + Duration::minutes(20);
    let third = guard.evaluate_at(validate_decision(raw_close("SOL", "x")), Some(&snapshot), later);
    assert!(third.allowed);
    assert_eq!(
        third.override_reason.as_deref(),
        Some("Position held for 30 min (>= 30 min)")
    );
}

#[test]
fn test_decision_json_to_prompt_round() {
    let json = r#"{
        "operation": "open", "symbol": "eth", "direction": "short",
        "target_portion_of_balance": 1.7, "leverage": 25, "reason": "Bearish divergence"
    }"#;
    let raw: RawDecision = assert_ok!(serde_json::from_str(json));
    let action = validate_decision(raw);

    assert_eq!(action.symbol, "ETH");
    assert_eq!(action.target_portion_of_balance, 1.0);
    assert_eq!(action.leverage, 10);

    let bad: Result<RawDecision, _> = serde_json::from_str(r#"{"operation": "buy"}"#);
    assert_err!(bad);

    let prompt = render_system_prompt(
        "P: {}\nM: {}",
        &assert_ok!(serde_json::to_string(&action)),
        &market_info_block("<ETH_data></ETH_data>", "forecast table"),
    );
    assert!(prompt.starts_with("P: {\"operation\":\"open\""));
    assert!(prompt.contains("<indicators>\n<ETH_data></ETH_data>\n</indicators>"));
}
