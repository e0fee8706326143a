//! Batch scheduler for queue items.
//!
//! The queue item state machine is not internally synchronized. The manager
//! guarantees at most one concurrent `process` per item id within its own
//! process; across processes the compare-and-swap in [`QueuePersistence`]
//! turns a lease violation into a `StateConflict` instead of a double
//! transition.
//!
//! [`QueuePersistence`]: super::QueuePersistence

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::client::Mailer;
use crate::errors::{MailErrorKind, MailResult};

use super::{DeliveryStatus, ProcessHooks, ProcessOutcome, QueueField, QueueItem};

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueManagerConfig {
    /// Items loaded per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Items processed concurrently within a batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Deadline for a single `process` call. Expiry counts as a retry.
    #[serde(default, with = "crate::config::humantime_serde::option")]
    pub process_timeout: Option<Duration>,
    /// Pause between batches in [`QueueManager::run`].
    #[serde(default = "default_poll_interval", with = "crate::config::humantime_serde")]
    pub poll_interval: Duration,
}

fn default_batch_size() -> usize { 50 }
fn default_concurrency() -> usize { 4 }
fn default_poll_interval() -> Duration { Duration::from_secs(10) }

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            process_timeout: None,
            poll_interval: default_poll_interval(),
        }
    }
}

impl QueueManagerConfig {
    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the per-item deadline.
    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = Some(timeout);
        self
    }

    /// Sets the pause between batches.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Counts from one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Items delivered.
    pub delivered: usize,
    /// Items failed permanently, including expired ones.
    pub failed: usize,
    /// Items left for another attempt, including timed out ones.
    pub retried: usize,
    /// Items not attempted: not due, already in flight, or handled elsewhere.
    pub skipped: usize,
    /// Items whose `process` call hit the deadline (subset of `retried`).
    pub timed_out: usize,
    /// Items whose `process` call returned an error.
    pub errored: usize,
}

impl BatchReport {
    /// Returns the number of items looked at.
    pub fn total(&self) -> usize {
        self.delivered + self.failed + self.retried + self.skipped + self.errored
    }

    fn record(&mut self, entry: BatchEntry) {
        match entry {
            BatchEntry::Delivered => self.delivered += 1,
            BatchEntry::Failed => self.failed += 1,
            BatchEntry::Retried => self.retried += 1,
            BatchEntry::Skipped => self.skipped += 1,
            BatchEntry::TimedOut => {
                self.retried += 1;
                self.timed_out += 1;
            }
            BatchEntry::Errored => self.errored += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BatchEntry {
    Delivered,
    Failed,
    Retried,
    Skipped,
    TimedOut,
    Errored,
}

impl BatchEntry {
    fn from_result(result: MailResult<ProcessOutcome>, item_id: &str) -> Self {
        match result {
            Ok(ProcessOutcome::Delivered) => BatchEntry::Delivered,
            Ok(ProcessOutcome::Failed) => BatchEntry::Failed,
            Ok(ProcessOutcome::Retry) => BatchEntry::Retried,
            Ok(ProcessOutcome::AlreadyProcessed) => BatchEntry::Skipped,
            Err(err) if matches!(err.kind(), MailErrorKind::AlreadyProcessed | MailErrorKind::StateConflict) => {
                warn!(item_id, error = %err, "Queue item changed concurrently");
                BatchEntry::Skipped
            }
            Err(err) => {
                error!(item_id, error = %err, "Queue item processing failed");
                BatchEntry::Errored
            }
        }
    }
}

/// Loads due queue items and processes them in batches.
#[derive(Debug)]
pub struct QueueManager {
    mailer: Arc<Mailer>,
    config: QueueManagerConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl QueueManager {
    /// Creates a manager.
    pub fn new(mailer: Arc<Mailer>, config: QueueManagerConfig) -> Self {
        Self {
            mailer,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &QueueManagerConfig {
        &self.config
    }

    /// Processes one batch of due items.
    pub async fn process_batch(&self) -> MailResult<BatchReport> {
        let items = self
            .mailer
            .persistence()
            .load_pending(self.config.batch_size)
            .await?;
        let now = Utc::now();
        let mut report = BatchReport::default();

        let mut leased = Vec::with_capacity(items.len());
        for item in items {
            if item.status.is_terminal() || !item.is_due(now) {
                report.record(BatchEntry::Skipped);
                continue;
            }
            match self.lease(&item.id) {
                Some(lease) => leased.push((item, lease)),
                None => report.record(BatchEntry::Skipped),
            }
        }

        let entries: Vec<BatchEntry> = stream::iter(leased)
            .map(|(item, lease)| self.process_leased(item, lease, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        for entry in entries {
            report.record(entry);
        }

        if report.total() > 0 {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                retried = report.retried,
                skipped = report.skipped,
                timed_out = report.timed_out,
                errored = report.errored,
                "Queue batch processed"
            );
        }
        Ok(report)
    }

    /// Runs batches every `poll_interval` until `shutdown` turns true or its
    /// sender is dropped. Batch errors are logged and do not stop the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.process_batch().await {
                        error!(error = %err, "Failed to load queue batch");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Queue manager stopped");
    }

    fn in_flight_ids(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lease(&self, id: &str) -> Option<Lease<'_>> {
        if !self.in_flight_ids().insert(id.to_string()) {
            return None;
        }
        Some(Lease {
            manager: self,
            id: id.to_string(),
        })
    }

    async fn process_leased(&self, mut item: QueueItem, lease: Lease<'_>, now: DateTime<Utc>) -> BatchEntry {
        let id = item.id.clone();

        let entry = if item.is_expired(now) {
            self.expire(&item, now).await
        } else {
            let processing = item.process(&self.mailer, ProcessHooks::new());
            match self.config.process_timeout {
                Some(limit) => match tokio::time::timeout(limit, processing).await {
                    Ok(result) => BatchEntry::from_result(result, &id),
                    Err(_) => {
                        warn!(item_id = %id, timeout = ?limit, "Queue item timed out, leaving it for retry");
                        BatchEntry::TimedOut
                    }
                },
                None => BatchEntry::from_result(processing.await, &id),
            }
        };

        drop(lease);
        entry
    }

    async fn expire(&self, item: &QueueItem, now: DateTime<Utc>) -> BatchEntry {
        let mut expired = item.clone();
        expired.status = DeliveryStatus::Failed;
        expired.processed_at = Some(now);

        let result = self
            .mailer
            .persistence()
            .update(&expired, &[QueueField::Status, QueueField::ProcessedAt], item.status)
            .await;
        match result {
            Ok(()) => {
                warn!(item_id = %item.id, queue_id = %item.queue_id, "Queue item expired");
                self.mailer.metrics().record_processed();
                BatchEntry::Failed
            }
            Err(err) => BatchEntry::from_result(Err(err), &item.id),
        }
    }
}

/// Marks an item id as in flight until dropped, including when a batch
/// future is cancelled mid-flight.
struct Lease<'a> {
    manager: &'a QueueManager,
    id: String,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.manager.in_flight_ids().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::errors::MailError;
    use crate::mocks::{InMemoryQueueStore, MemoryLogSink, MockTransportFactory, StaticDefaults};
    use crate::queue::QueuePersistence;

    struct Fixture {
        transports: Arc<MockTransportFactory>,
        store: Arc<InMemoryQueueStore>,
        mailer: Arc<Mailer>,
    }

    fn fixture() -> Fixture {
        let transports = Arc::new(MockTransportFactory::new());
        let store = Arc::new(InMemoryQueueStore::new());
        let mailer = Mailer::builder()
            .defaults(Arc::new(StaticDefaults::new("sender@example.com")))
            .transports(transports.clone())
            .log_sink(Arc::new(MemoryLogSink::new()))
            .persistence(store.clone())
            .build()
            .unwrap();
        Fixture {
            transports,
            store,
            mailer: Arc::new(mailer),
        }
    }

    fn item(to: &str) -> QueueItem {
        QueueItem::new(
            "q1",
            "c1",
            Address::new("sender@example.com").unwrap(),
            Address::new(to).unwrap(),
            "Batch",
        )
        .with_html_body("<p>Batch</p>")
    }

    #[tokio::test]
    async fn test_batch_processes_due_items() {
        let f = fixture();
        for to in ["a@example.com", "b@example.com", "c@example.com"] {
            f.store.save(&item(to)).await.unwrap();
        }
        f.transports.fail_next_with(MailError::transient("Busy"));

        let manager = QueueManager::new(f.mailer.clone(), QueueManagerConfig::default().with_concurrency(1));
        let report = manager.process_batch().await.unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.retried, 1);
        assert_eq!(report.total(), 3);

        let report = manager.process_batch().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(f.store.load_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_items_fail_without_attempt() {
        let f = fixture();
        let expired = item("a@example.com").expires_at(Utc::now() - chrono::Duration::minutes(1));
        f.store.save(&expired).await.unwrap();

        let manager = QueueManager::new(f.mailer.clone(), QueueManagerConfig::default());
        let report = manager.process_batch().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(f.transports.attempts(), 0);
        assert_eq!(f.store.get(&expired.id).unwrap().status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn test_uncomposable_items_are_not_reloaded() {
        let transports = Arc::new(MockTransportFactory::new());
        let store = Arc::new(InMemoryQueueStore::new());
        let mailer = Mailer::builder()
            .defaults(Arc::new(StaticDefaults::new("sender@example.com").with_reply_to("not-an-address")))
            .transports(transports.clone())
            .persistence(store.clone())
            .build()
            .unwrap();
        let broken = item("a@example.com");
        store.save(&broken).await.unwrap();

        let manager = QueueManager::new(Arc::new(mailer), QueueManagerConfig::default());
        let report = manager.process_batch().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.errored, 0);

        for _ in 0..2 {
            assert_eq!(manager.process_batch().await.unwrap().total(), 0);
        }
        assert_eq!(transports.attempts(), 0);
        assert_eq!(store.get(&broken.id).unwrap().status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn test_future_items_are_not_loaded() {
        let f = fixture();
        let later = item("a@example.com").scheduled_at(Utc::now() + chrono::Duration::hours(1));
        f.store.save(&later).await.unwrap();

        let manager = QueueManager::new(f.mailer.clone(), QueueManagerConfig::default());
        let report = manager.process_batch().await.unwrap();

        assert_eq!(report.total(), 0);
        assert_eq!(f.transports.attempts(), 0);
    }

    #[tokio::test]
    async fn test_timeout_leaves_item_for_retry() {
        let f = fixture();
        let slow = item("a@example.com");
        f.store.save(&slow).await.unwrap();
        f.transports.set_delay(Duration::from_millis(200));

        let config = QueueManagerConfig::default().with_process_timeout(Duration::from_millis(20));
        let manager = QueueManager::new(f.mailer.clone(), config);
        let report = manager.process_batch().await.unwrap();

        assert_eq!(report.timed_out, 1);
        assert_eq!(report.retried, 1);
        assert_eq!(f.store.get(&slow.id).unwrap().status, DeliveryStatus::Pending);
        assert!(manager.in_flight_ids().is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_items_are_skipped() {
        let f = fixture();
        let busy = item("a@example.com");
        f.store.save(&busy).await.unwrap();

        let manager = QueueManager::new(f.mailer.clone(), QueueManagerConfig::default());
        manager.in_flight_ids().insert(busy.id.clone());

        let report = manager.process_batch().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(f.transports.attempts(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_batch_releases_leases() {
        let f = fixture();
        let slow = item("a@example.com");
        f.store.save(&slow).await.unwrap();
        f.transports.set_delay(Duration::from_millis(200));

        let manager = QueueManager::new(f.mailer.clone(), QueueManagerConfig::default());
        let cancelled = tokio::time::timeout(Duration::from_millis(20), manager.process_batch()).await;
        assert!(cancelled.is_err());
        assert!(manager.in_flight_ids().is_empty());

        f.transports.set_delay(Duration::ZERO);
        let report = manager.process_batch().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(f.store.get(&slow.id).unwrap().status, DeliveryStatus::Success);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture();
        f.store.save(&item("a@example.com")).await.unwrap();

        let config = QueueManagerConfig::default().with_poll_interval(Duration::from_millis(10));
        let manager = QueueManager::new(f.mailer.clone(), config);
        let (tx, rx) = watch::channel(false);

        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(manager.run(rx), stop);

        assert_eq!(f.transports.sent().len(), 1);
    }

    #[test]
    fn test_config_from_json() {
        let config: QueueManagerConfig =
            serde_json::from_str(r#"{"batch_size": 10, "process_timeout": "5s", "poll_interval": "1m"}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.process_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.poll_interval, Duration::from_secs(60));
    }
}
