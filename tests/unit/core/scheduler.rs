//! Unit tests for the job scheduler

use async_trait::async_trait;
use crypto_monitor::core::scheduler::{cron_expression, JobScheduler, ScheduledJob};
use crypto_monitor::error::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct CountingJob {
    runs: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ScheduledJob for CountingJob {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn run(&self) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::NotConfigured("test"));
        }
        Ok(())
    }
}

#[test]
fn interval_maps_to_cron_expression() {
    assert_eq!(cron_expression(5).unwrap(), "*/5 * * * * *");
    assert_eq!(cron_expression(300).unwrap(), "0 */5 * * * *");
    assert_eq!(cron_expression(3600).unwrap(), "0 0 */1 * * *");
    assert_eq!(cron_expression(7200).unwrap(), "0 0 */2 * * *");
    assert_eq!(cron_expression(86400).unwrap(), "0 0 0 * * *");
    assert!(cron_expression(0).is_err());
}

#[test]
fn uneven_intervals_are_rejected() {
    for interval in [7, 45, 90, 420, 5400, 18000, 172800] {
        assert!(
            cron_expression(interval).is_err(),
            "{}s would tick unevenly",
            interval
        );
    }
}

#[test]
fn zero_interval_is_rejected() {
    let job: Arc<dyn ScheduledJob> = Arc::new(CountingJob::default());
    assert!(JobScheduler::new(job, 0).is_err());
}

#[tokio::test]
async fn start_and_stop() {
    let job = Arc::new(CountingJob::default());
    let scheduler = JobScheduler::new(job.clone(), 1).unwrap();
    assert!(!scheduler.is_running().await);

    scheduler.start().await;
    scheduler.start().await;
    assert!(scheduler.is_running().await);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.stop().await;
    assert!(!scheduler.is_running().await);

    let runs = job.runs.load(Ordering::SeqCst);
    assert!((1..=3).contains(&runs), "runs: {}", runs);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(job.runs.load(Ordering::SeqCst), runs, "no ticks after stop");
}

#[tokio::test]
async fn failing_tick_does_not_stop_the_loop() {
    let job = Arc::new(CountingJob {
        runs: AtomicUsize::new(0),
        fail: true,
    });
    let scheduler = JobScheduler::new(job.clone(), 1).unwrap();

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.stop().await;

    assert!(job.runs.load(Ordering::SeqCst) >= 2);
}
