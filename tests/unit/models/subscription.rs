//! Unit tests for subscription conditions and evaluation

use chrono::Utc;
use crypto_monitor::error::ValidationError;
use crypto_monitor::models::subscription::percent_change;
use crypto_monitor::models::{normalize_symbol, Condition, ConditionKind, Subscription};

fn subscription(condition: Condition, reference_price: Option<f64>) -> Subscription {
    let now = Utc::now();
    Subscription {
        id: 1,
        user_id: 7,
        symbol: "BTC".to_string(),
        condition,
        active: true,
        armed: true,
        reference_price,
        last_price: None,
        last_triggered_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn parses_word_and_symbol_forms() {
    let cases = [
        ("above 50000", Condition::price_above(50000.0)),
        (">50000", Condition::price_above(50000.0)),
        ("> $50,000", Condition::price_above(50000.0)),
        ("below 30000.5", Condition::price_below(30000.5)),
        ("<30000", Condition::price_below(30000.0)),
        ("change 5", Condition::percent_change(5.0)),
        ("CHANGE 2.5%", Condition::percent_change(2.5)),
        ("5%", Condition::percent_change(5.0)),
        ("percent_change 3", Condition::percent_change(3.0)),
    ];

    for (raw, expected) in cases {
        let parsed: Condition = raw.parse().unwrap_or_else(|e| panic!("{}: {}", raw, e));
        assert_eq!(parsed, expected, "{}", raw);
    }
}

#[test]
fn rejects_malformed_conditions() {
    for raw in ["", "above", "above fifty", "sideways 5", "above -3", "0%", "above 1 2"] {
        let err = raw.parse::<Condition>().unwrap_err();
        assert!(
            matches!(err, ValidationError::InvalidCondition(_)),
            "{}: {:?}",
            raw,
            err
        );
    }
}

#[test]
fn display_round_trips_through_parse() {
    for condition in [
        Condition::price_above(50000.0),
        Condition::price_below(0.25),
        Condition::percent_change(7.5),
    ] {
        let parsed: Condition = condition.to_string().parse().unwrap();
        assert_eq!(parsed, condition);
    }
}

#[test]
fn condition_kind_names_are_stable() {
    for kind in [
        ConditionKind::PriceAbove,
        ConditionKind::PriceBelow,
        ConditionKind::PercentChange,
    ] {
        assert_eq!(ConditionKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(ConditionKind::parse("sideways"), None);
}

#[test]
fn normalizes_symbols() {
    assert_eq!(normalize_symbol(" btc ").unwrap(), "BTC");
    assert_eq!(normalize_symbol("Doge").unwrap(), "DOGE");
    for raw in ["B", "BITCOIN", "BTC1", "BT-C", ""] {
        assert!(normalize_symbol(raw).is_err(), "{}", raw);
    }
}

#[test]
fn threshold_is_strict() {
    let condition = Condition::price_above(50000.0);
    assert!(!condition.is_met(50000.0, None));
    assert!(condition.is_met(50000.01, None));

    let condition = Condition::price_below(30000.0);
    assert!(!condition.is_met(30000.0, None));
    assert!(condition.is_met(29999.0, None));
}

#[test]
fn percent_change_needs_reference() {
    let condition = Condition::percent_change(5.0);
    assert!(!condition.is_met(200.0, None));
    assert!(!condition.is_met(200.0, Some(0.0)));
    assert!(condition.is_met(105.0, Some(100.0)));
    assert!(condition.is_met(95.0, Some(100.0)));
    assert!(!condition.is_met(104.9, Some(100.0)));
    assert!((percent_change(100.0, 95.0) + 5.0).abs() < 1e-12);
}

#[test]
fn armed_price_condition_fires_and_disarms() {
    let sub = subscription(Condition::price_above(50000.0), None);
    let now = Utc::now();

    let evaluation = sub.evaluate(51000.0, now);
    assert!(evaluation.fired);
    assert!(!evaluation.update.armed);
    assert_eq!(evaluation.update.last_price, 51000.0);
    assert_eq!(evaluation.update.last_triggered_at, Some(now));
}

#[test]
fn disarmed_price_condition_rearms_when_false() {
    let mut sub = subscription(Condition::price_above(50000.0), None);
    sub.armed = false;

    let still_met = sub.evaluate(52000.0, Utc::now());
    assert!(!still_met.fired);
    assert!(!still_met.update.armed);

    let cleared = sub.evaluate(49000.0, Utc::now());
    assert!(!cleared.fired);
    assert!(cleared.update.armed);
}

#[test]
fn percent_change_without_reference_adopts_first_price() {
    let sub = subscription(Condition::percent_change(5.0), None);

    let evaluation = sub.evaluate(100.0, Utc::now());
    assert!(!evaluation.fired);
    assert_eq!(evaluation.update.reference_price, Some(100.0));
}

#[test]
fn alert_message_names_symbol_and_price() {
    let sub = subscription(Condition::price_above(50000.0), None);
    let text = sub.alert_message(51000.0);
    assert!(text.contains("BTC"));
    assert!(text.contains("51000"));

    let sub = subscription(Condition::percent_change(5.0), Some(100.0));
    assert!(sub.alert_message(110.0).contains("+10.00%"));
}

#[test]
fn change_since_subscription_uses_reference() {
    let sub = subscription(Condition::price_above(1.0), Some(200.0));
    assert_eq!(sub.change_since_subscription(250.0), Some(25.0));
    assert_eq!(
        subscription(Condition::price_above(1.0), None).change_since_subscription(250.0),
        None
    );
}
