//! Unit tests for the in-memory storage backend

use chrono::{Duration, Utc};
use crypto_monitor::db::memory::REQUEST_LOG_CAPACITY;
use crypto_monitor::db::{MemoryDatabase, PruneCutoffs, PruneReport, Storage};
use crypto_monitor::error::PersistenceError;
use crypto_monitor::models::{
    Condition, DeliveryStatus, Forecast, NewForecastRecord, NewNotificationLog, NewSubscription,
    PricePoint, RequestLog, SubscriptionUpdate,
};

fn new_subscription(user_id: i64, symbol: &str, condition: Condition) -> NewSubscription {
    NewSubscription {
        user_id,
        symbol: symbol.to_string(),
        condition,
        reference_price: Some(100.0),
    }
}

fn point(symbol: &str, price: f64, hours_ago: i64) -> PricePoint {
    PricePoint {
        id: None,
        symbol: symbol.to_string(),
        price,
        percent_change_24h: None,
        source: "test".to_string(),
        recorded_at: Utc::now() - Duration::hours(hours_ago),
    }
}

fn request(id: usize, days_ago: i64) -> RequestLog {
    RequestLog {
        request_id: format!("req-{}", id),
        timestamp: Utc::now() - Duration::days(days_ago),
        method: "GET".to_string(),
        url: "/health".to_string(),
        client_host: None,
        query_params: None,
        request_body: None,
        response_body: None,
        status_code: 200,
        processing_time: 0.001,
    }
}

fn notification(user_id: i64, message: &str, days_ago: i64) -> NewNotificationLog {
    NewNotificationLog {
        user_id,
        symbol: "BTC".to_string(),
        kind: "price_above".to_string(),
        message: message.to_string(),
        status: DeliveryStatus::Sent,
        error: None,
        sent_at: Utc::now() - Duration::days(days_ago),
    }
}

#[tokio::test]
async fn upsert_replaces_and_rearms() {
    let db = MemoryDatabase::new();
    let first = db
        .upsert_subscription(&new_subscription(1, "BTC", Condition::price_above(50000.0)))
        .await
        .unwrap();

    db.record_evaluation(
        first.id,
        first.updated_at,
        &SubscriptionUpdate {
            armed: false,
            reference_price: Some(100.0),
            last_price: 51000.0,
            last_triggered_at: Some(Utc::now()),
            updated_at: Utc::now(),
        },
    )
    .await
    .unwrap();

    let replaced = db
        .upsert_subscription(&new_subscription(1, "BTC", Condition::price_below(40000.0)))
        .await
        .unwrap();

    assert_eq!(replaced.id, first.id);
    assert_eq!(replaced.condition, Condition::price_below(40000.0));
    assert!(replaced.armed);
    assert!(replaced.last_triggered_at.is_none());
    assert_eq!(db.active_subscriptions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn upsert_rejects_non_positive_threshold() {
    let db = MemoryDatabase::new();
    let err = db
        .upsert_subscription(&new_subscription(1, "BTC", Condition::price_above(0.0)))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::Constraint(_)));
}

#[tokio::test]
async fn deactivate_reports_whether_anything_changed() {
    let db = MemoryDatabase::new();
    db.upsert_subscription(&new_subscription(1, "BTC", Condition::percent_change(5.0)))
        .await
        .unwrap();
    db.upsert_subscription(&new_subscription(1, "ETH", Condition::percent_change(5.0)))
        .await
        .unwrap();

    assert!(db.deactivate_subscription(1, "BTC").await.unwrap());
    assert!(!db.deactivate_subscription(1, "BTC").await.unwrap());
    assert!(!db.deactivate_subscription(2, "ETH").await.unwrap());

    let remaining = db.user_subscriptions(1).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].symbol, "ETH");
}

#[tokio::test]
async fn resubscribe_reactivates() {
    let db = MemoryDatabase::new();
    let sub = new_subscription(1, "BTC", Condition::percent_change(5.0));
    db.upsert_subscription(&sub).await.unwrap();
    db.deactivate_subscription(1, "BTC").await.unwrap();
    assert!(db.active_subscriptions().await.unwrap().is_empty());

    db.upsert_subscription(&sub).await.unwrap();
    assert_eq!(db.active_subscriptions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn record_evaluation_on_unknown_id_is_not_found() {
    let db = MemoryDatabase::new();
    let err = db
        .record_evaluation(
            42,
            Utc::now(),
            &SubscriptionUpdate {
                armed: true,
                reference_price: None,
                last_price: 1.0,
                last_triggered_at: None,
                updated_at: Utc::now(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::NotFound { .. }));
}

#[tokio::test]
async fn price_history_is_windowed_and_oldest_first() {
    let db = MemoryDatabase::new();
    db.store_price(&point("BTC", 3.0, 1)).await.unwrap();
    db.store_price(&point("BTC", 1.0, 30)).await.unwrap();
    db.store_price(&point("BTC", 2.0, 5)).await.unwrap();
    db.store_price(&point("ETH", 9.0, 2)).await.unwrap();

    let history = db
        .price_history("BTC", Utc::now() - Duration::hours(24))
        .await
        .unwrap();
    let prices: Vec<f64> = history.iter().map(|p| p.price).collect();
    assert_eq!(prices, vec![2.0, 3.0]);
    assert!(history.iter().all(|p| p.id.is_some()));
}

#[tokio::test]
async fn forecasts_are_newest_first_and_limited() {
    let db = MemoryDatabase::new();
    for (i, symbol) in ["BTC", "ETH", "BTC"].iter().enumerate() {
        db.store_forecast(&NewForecastRecord {
            symbol: symbol.to_string(),
            forecast: Forecast {
                predicted_price: 100.0 + i as f64,
                confidence: 0.5,
                rationale: String::new(),
            },
            base_price: 100.0,
            created_at: Utc::now() - Duration::hours(10 - i as i64),
        })
        .await
        .unwrap();
    }

    let all = db.recent_forecasts(None, 10).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].predicted_price, 102.0);

    let btc = db.recent_forecasts(Some("BTC"), 1).await.unwrap();
    assert_eq!(btc.len(), 1);
    assert_eq!(btc[0].predicted_price, 102.0);
}

#[tokio::test]
async fn forecast_confidence_is_checked() {
    let db = MemoryDatabase::new();
    let err = db
        .store_forecast(&NewForecastRecord {
            symbol: "BTC".to_string(),
            forecast: Forecast {
                predicted_price: 1.0,
                confidence: 1.5,
                rationale: String::new(),
            },
            base_price: 1.0,
            created_at: Utc::now(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::Constraint(_)));
}

#[tokio::test]
async fn resolving_removes_forecast_from_unresolved() {
    let db = MemoryDatabase::new();
    let stored = db
        .store_forecast(&NewForecastRecord {
            symbol: "BTC".to_string(),
            forecast: Forecast {
                predicted_price: 110.0,
                confidence: 0.7,
                rationale: "momentum".to_string(),
            },
            base_price: 100.0,
            created_at: Utc::now() - Duration::hours(30),
        })
        .await
        .unwrap();

    let cutoff = Utc::now() - Duration::hours(24);
    assert_eq!(db.unresolved_forecasts(cutoff).await.unwrap().len(), 1);

    db.resolve_forecast(stored.id, 100.0, 0.9, Utc::now())
        .await
        .unwrap();
    assert!(db.unresolved_forecasts(cutoff).await.unwrap().is_empty());

    let resolved = db.recent_forecasts(Some("BTC"), 1).await.unwrap();
    assert_eq!(resolved[0].actual_price, Some(100.0));
    assert_eq!(resolved[0].accuracy_score, Some(0.9));
}

#[tokio::test]
async fn notifications_are_per_user_newest_first() {
    let db = MemoryDatabase::new();
    db.store_notification(&notification(1, "old", 3)).await.unwrap();
    db.store_notification(&notification(1, "new", 1)).await.unwrap();
    db.store_notification(&notification(2, "other", 0)).await.unwrap();

    let logs = db.user_notifications(1, 10).await.unwrap();
    let messages: Vec<&str> = logs.iter().map(|n| n.message.as_str()).collect();
    assert_eq!(messages, vec!["new", "old"]);

    assert_eq!(db.user_notifications(1, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn prune_counts_removed_rows() {
    let db = MemoryDatabase::new();
    db.store_price(&point("BTC", 1.0, 24 * 40)).await.unwrap();
    db.store_price(&point("BTC", 2.0, 1)).await.unwrap();
    db.store_notification(&notification(1, "ancient", 100)).await.unwrap();
    db.store_notification(&notification(1, "recent", 1)).await.unwrap();

    db.store_request_log(&request(1, 45)).await.unwrap();
    db.store_request_log(&request(2, 2)).await.unwrap();

    let report = db
        .prune(&PruneCutoffs {
            prices_before: Utc::now() - Duration::days(30),
            notifications_before: Utc::now() - Duration::days(90),
            request_logs_before: Utc::now() - Duration::days(30),
        })
        .await
        .unwrap();

    assert_eq!(
        report,
        PruneReport {
            price_points: 1,
            notifications: 1,
            request_logs: 1,
        }
    );
    assert_eq!(db.price_points().await.len(), 1);
    assert_eq!(db.notification_logs().await.len(), 1);
    let requests = db.request_logs().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].request_id, "req-2");
}

#[tokio::test]
async fn request_logs_are_capped_oldest_first() {
    let db = MemoryDatabase::new();
    for id in 0..REQUEST_LOG_CAPACITY + 5 {
        db.store_request_log(&request(id, 0)).await.unwrap();
    }

    let requests = db.request_logs().await;
    assert_eq!(requests.len(), REQUEST_LOG_CAPACITY);
    assert_eq!(requests[0].request_id, "req-5");
    assert_eq!(
        requests[REQUEST_LOG_CAPACITY - 1].request_id,
        format!("req-{}", REQUEST_LOG_CAPACITY + 4)
    );
}

#[tokio::test]
async fn evaluation_of_a_replaced_subscription_is_dropped() {
    let db = MemoryDatabase::new();
    let loaded = db
        .upsert_subscription(&new_subscription(1, "BTC", Condition::price_above(50000.0)))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let replaced = db
        .upsert_subscription(&new_subscription(1, "BTC", Condition::price_below(40000.0)))
        .await
        .unwrap();
    assert_ne!(loaded.updated_at, replaced.updated_at);

    let written = db
        .record_evaluation(
            loaded.id,
            loaded.updated_at,
            &SubscriptionUpdate {
                armed: false,
                reference_price: Some(100.0),
                last_price: 51000.0,
                last_triggered_at: Some(Utc::now()),
                updated_at: Utc::now(),
            },
        )
        .await
        .unwrap();

    assert!(!written);
    let current = db.user_subscriptions(1).await.unwrap();
    assert_eq!(current[0].condition, Condition::price_below(40000.0));
    assert!(current[0].armed);
    assert!(current[0].last_price.is_none());
}
