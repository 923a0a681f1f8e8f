//! # Metrics and Monitoring
//!
//! Operation counters for an embedding store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Metrics collector
#[derive(Clone, Default)]
pub struct StoreMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Write metrics
    inserts: AtomicU64,
    rejected_inserts: AtomicU64,
    clears: AtomicU64,

    // Query metrics
    searches: AtomicU64,
    rejected_searches: AtomicU64,

    // Persistence metrics
    saves: AtomicU64,
    save_failures: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
}

impl StoreMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&self) {
        self.inner.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_insert(&self) {
        self.inner.rejected_inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clear(&self) {
        self.inner.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_search(&self) {
        self.inner.searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_search(&self) {
        self.inner.rejected_searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save(&self, bytes: u64) {
        self.inner.saves.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_save_failure(&self) {
        self.inner.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self, bytes: u64) {
        self.inner.loads.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_load_failure(&self) {
        self.inner.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            inserts: self.inner.inserts.load(Ordering::Relaxed),
            rejected_inserts: self.inner.rejected_inserts.load(Ordering::Relaxed),
            clears: self.inner.clears.load(Ordering::Relaxed),
            searches: self.inner.searches.load(Ordering::Relaxed),
            rejected_searches: self.inner.rejected_searches.load(Ordering::Relaxed),
            saves: self.inner.saves.load(Ordering::Relaxed),
            save_failures: self.inner.save_failures.load(Ordering::Relaxed),
            loads: self.inner.loads.load(Ordering::Relaxed),
            load_failures: self.inner.load_failures.load(Ordering::Relaxed),
            bytes_written: self.inner.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.inner.bytes_read.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub inserts: u64,
    pub rejected_inserts: u64,
    pub clears: u64,
    pub searches: u64,
    pub rejected_searches: u64,
    pub saves: u64,
    pub save_failures: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Start new timer
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and log duration
    pub fn stop(self) -> Duration {
        let duration = self.elapsed();
        tracing::debug!(
            name = self.name,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
        duration
    }
}
