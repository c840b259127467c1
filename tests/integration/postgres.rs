//! Postgres storage tests, run only when TEST_DATABASE_URL is set

use chrono::{Duration, Utc};
use crypto_monitor::db::{PostgresDatabase, Storage};
use crypto_monitor::error::PersistenceError;
use crypto_monitor::models::{
    Condition, DeliveryStatus, Forecast, NewForecastRecord, NewNotificationLog, NewSubscription,
    PricePoint, RequestLog, SubscriptionUpdate,
};

async fn database() -> Option<PostgresDatabase> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    Some(
        PostgresDatabase::connect(&url)
            .await
            .expect("connect to TEST_DATABASE_URL"),
    )
}

/// Ids unique to this run so reruns against the same database do not collide.
fn unique_user_id() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default() / 1000
}

#[tokio::test]
async fn subscription_upsert_and_deactivate() {
    let Some(db) = database().await else {
        return;
    };
    let user_id = unique_user_id();

    let first = db
        .upsert_subscription(&NewSubscription {
            user_id,
            symbol: "BTC".to_string(),
            condition: Condition::price_above(50000.0),
            reference_price: Some(48000.0),
        })
        .await
        .unwrap();
    assert!(first.active && first.armed);

    let replaced = db
        .upsert_subscription(&NewSubscription {
            user_id,
            symbol: "BTC".to_string(),
            condition: Condition::price_below(40000.0),
            reference_price: Some(47000.0),
        })
        .await
        .unwrap();
    assert_eq!(replaced.id, first.id);
    assert_eq!(replaced.condition, Condition::price_below(40000.0));

    // An evaluation computed from the first version of the row is stale.
    let stale = first.evaluate(51000.0, Utc::now());
    assert!(!db
        .record_evaluation(first.id, first.updated_at, &stale.update)
        .await
        .unwrap());

    let evaluation = replaced.evaluate(39000.0, Utc::now());
    assert!(db
        .record_evaluation(replaced.id, replaced.updated_at, &evaluation.update)
        .await
        .unwrap());
    let stored = &db.user_subscriptions(user_id).await.unwrap()[0];
    assert!(!stored.armed);
    assert_eq!(stored.last_price, Some(39000.0));

    assert!(db.deactivate_subscription(user_id, "BTC").await.unwrap());
    assert!(!db.deactivate_subscription(user_id, "BTC").await.unwrap());
    assert!(db.user_subscriptions(user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn constraint_violations_are_classified() {
    let Some(db) = database().await else {
        return;
    };

    let err = db
        .upsert_subscription(&NewSubscription {
            user_id: unique_user_id(),
            symbol: "BTC".to_string(),
            condition: Condition::percent_change(-1.0),
            reference_price: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::Constraint(_)), "{:?}", err);

    let update = SubscriptionUpdate {
        armed: true,
        reference_price: None,
        last_price: 2.0,
        last_triggered_at: None,
        updated_at: Utc::now(),
    };
    let err = db
        .record_evaluation(-1, Utc::now(), &update)
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::NotFound { .. }), "{:?}", err);
}

#[tokio::test]
async fn history_forecasts_and_logs_round_trip() {
    let Some(db) = database().await else {
        return;
    };
    let user_id = unique_user_id();
    let symbol = "TSTPG";
    let now = Utc::now();

    db.store_price(&PricePoint {
        id: None,
        symbol: symbol.to_string(),
        price: 10.0,
        percent_change_24h: Some(1.0),
        source: "test".to_string(),
        recorded_at: now - Duration::hours(1),
    })
    .await
    .unwrap();
    let history = db
        .price_history(symbol, now - Duration::hours(2))
        .await
        .unwrap();
    assert!(history.iter().any(|p| p.price == 10.0));

    let stored = db
        .store_forecast(&NewForecastRecord {
            symbol: symbol.to_string(),
            forecast: Forecast {
                predicted_price: 11.0,
                confidence: 0.5,
                rationale: "test".to_string(),
            },
            base_price: 10.0,
            created_at: now - Duration::hours(30),
        })
        .await
        .unwrap();
    db.resolve_forecast(stored.id, 10.0, 0.9, now).await.unwrap();
    let forecasts = db.recent_forecasts(Some(symbol), 50).await.unwrap();
    let resolved = forecasts.iter().find(|f| f.id == stored.id).unwrap();
    assert_eq!(resolved.accuracy_score, Some(0.9));

    db.store_notification(&NewNotificationLog {
        user_id,
        symbol: symbol.to_string(),
        kind: "price_above".to_string(),
        message: "test alert".to_string(),
        status: DeliveryStatus::Failed,
        error: Some("blocked".to_string()),
        sent_at: now,
    })
    .await
    .unwrap();
    let logs = db.user_notifications(user_id, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, DeliveryStatus::Failed);

    db.store_request_log(&RequestLog {
        request_id: uuid::Uuid::new_v4().to_string(),
        timestamp: now,
        method: "GET".to_string(),
        url: "/health".to_string(),
        client_host: Some("127.0.0.1".to_string()),
        query_params: None,
        request_body: None,
        response_body: Some("{}".to_string()),
        status_code: 200,
        processing_time: 0.001,
    })
    .await
    .unwrap();
}
