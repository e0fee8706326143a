//! Observability for mail dispatch.
//!
//! Provides dispatch metrics and operation timers. Structured events go
//! through `tracing`; installing a subscriber is left to the application.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Dispatch metrics collector.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Messages accepted by the transport.
    pub messages_sent: AtomicU64,
    /// Messages the transport rejected or failed on.
    pub messages_failed: AtomicU64,
    /// Failures classified as transient (subset of `messages_failed`).
    pub transient_failures: AtomicU64,
    /// Delivery log records appended.
    pub log_records: AtomicU64,
    /// Delivery log appends that failed.
    pub log_failures: AtomicU64,
    /// Queue items created.
    pub items_queued: AtomicU64,
    /// Queue items that reached a new status.
    pub items_processed: AtomicU64,
    /// Process calls on items that were already terminal.
    pub items_already_processed: AtomicU64,
}

impl DispatchMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful send.
    pub fn record_send_success(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed send.
    pub fn record_send_failure(&self, transient: bool) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
        if transient {
            self.transient_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a delivery log append.
    pub fn record_log_append(&self, success: bool) {
        if success {
            self.log_records.fetch_add(1, Ordering::Relaxed);
        } else {
            self.log_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records queue items created by a fan-out.
    pub fn record_queued(&self, count: usize) {
        self.items_queued.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a queue item transition.
    pub fn record_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a process call on a terminal item.
    pub fn record_already_processed(&self) {
        self.items_already_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            log_records: self.log_records.load(Ordering::Relaxed),
            log_failures: self.log_failures.load(Ordering::Relaxed),
            items_queued: self.items_queued.load(Ordering::Relaxed),
            items_processed: self.items_processed.load(Ordering::Relaxed),
            items_already_processed: self.items_already_processed.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        for counter in [
            &self.messages_sent,
            &self.messages_failed,
            &self.transient_failures,
            &self.log_records,
            &self.log_failures,
            &self.items_queued,
            &self.items_processed,
            &self.items_already_processed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Messages accepted by the transport.
    pub messages_sent: u64,
    /// Messages that failed.
    pub messages_failed: u64,
    /// Transient failures.
    pub transient_failures: u64,
    /// Delivery log records appended.
    pub log_records: u64,
    /// Delivery log append failures.
    pub log_failures: u64,
    /// Queue items created.
    pub items_queued: u64,
    /// Queue item transitions.
    pub items_processed: u64,
    /// Process calls on terminal items.
    pub items_already_processed: u64,
}

impl MetricsSnapshot {
    /// Returns the send success rate.
    pub fn success_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_failed;
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        tracing::debug!(
            timer = self.name,
            duration_ms = elapsed.as_millis() as u64,
            "Timer stopped"
        );
        elapsed
    }
}
