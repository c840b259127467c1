//! Unit tests for the retry-once rule on storage writes

use crypto_monitor::db::retry_write;
use crypto_monitor::error::PersistenceError;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_test::{assert_err, assert_ok};

type Failure = fn() -> PersistenceError;

/// A write that fails with the given errors in order, then succeeds
async fn scripted_write(calls: &AtomicUsize, failures: &[Failure]) -> Result<usize, PersistenceError> {
    let call = calls.fetch_add(1, Ordering::SeqCst);
    match failures.get(call) {
        Some(failure) => Err(failure()),
        None => Ok(call + 1),
    }
}

fn outage() -> PersistenceError {
    PersistenceError::Unavailable("connection reset".to_string())
}

fn duplicate() -> PersistenceError {
    PersistenceError::Constraint("duplicate key".to_string())
}

fn missing() -> PersistenceError {
    PersistenceError::NotFound {
        entity: "subscription",
        id: "42".to_string(),
    }
}

#[tokio::test]
async fn transient_failure_is_retried_once() {
    let calls = AtomicUsize::new(0);
    let failures: [Failure; 1] = [outage];
    let attempts = assert_ok!(retry_write("test", || scripted_write(&calls, &failures)).await);
    assert_eq!(attempts, 2);
}

#[tokio::test]
async fn second_failure_is_surfaced() {
    let calls = AtomicUsize::new(0);
    let failures: [Failure; 3] = [outage, outage, outage];
    let err = assert_err!(retry_write("test", || scripted_write(&calls, &failures)).await);
    assert!(matches!(err, PersistenceError::Unavailable(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let permanent: [Failure; 2] = [duplicate, missing];
    for failure in permanent {
        let calls = AtomicUsize::new(0);
        let failures = [failure];
        assert_err!(retry_write("test", || scripted_write(&calls, &failures)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn success_makes_a_single_call() {
    let calls = AtomicUsize::new(0);
    assert_ok!(retry_write("test", || scripted_write(&calls, &[])).await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
