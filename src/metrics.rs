// Performance metrics module
//
// Provides lightweight metrics tracking for scans, classification and moves

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Repository metrics
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// Shared through [`StateManager::metrics`](crate::state::StateManager::metrics)
/// and logged on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Snapshots published by the repository
    pub scans_completed: AtomicUsize,

    /// Archives opened and classified (cache misses)
    pub archives_classified: AtomicUsize,

    /// Archives whose cached verdict was reused
    pub cache_hits: AtomicUsize,

    /// Archives that could not be opened
    pub unreadable_archives: AtomicUsize,

    /// Total classification time in milliseconds
    pub total_classification_time_ms: AtomicU64,

    /// Filesystem notifications handled by the reconciler
    pub notifications_processed: AtomicU64,

    /// Notifications dropped while the reconciler was suspended
    pub notifications_suppressed: AtomicU64,

    /// Rescans postponed because another operation held the repository
    pub busy_retries: AtomicU64,

    /// Successful moves, installs and deletes
    pub file_operations: AtomicUsize,

    /// Failed items in batch operations
    pub file_operation_failures: AtomicUsize,

    /// Number of state updates performed
    pub state_updates: AtomicU64,

    /// Number of state broadcasts delivered to at least one subscriber
    pub state_broadcasts: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_completed: AtomicUsize::new(0),
            archives_classified: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            unreadable_archives: AtomicUsize::new(0),
            total_classification_time_ms: AtomicU64::new(0),
            notifications_processed: AtomicU64::new(0),
            notifications_suppressed: AtomicU64::new(0),
            busy_retries: AtomicU64::new(0),
            file_operations: AtomicUsize::new(0),
            file_operation_failures: AtomicUsize::new(0),
            state_updates: AtomicU64::new(0),
            state_broadcasts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_scan(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one classification and the time it took
    pub fn record_classification(&self, duration: Duration) {
        self.archives_classified.fetch_add(1, Ordering::Relaxed);
        self.total_classification_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unreadable_archive(&self) {
        self.unreadable_archives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification(&self) {
        self.notifications_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed_notification(&self) {
        self.notifications_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy_retry(&self) {
        self.busy_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_operation(&self) {
        self.file_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_operation_failure(&self) {
        self.file_operation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_update(&self) {
        self.state_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_broadcast(&self) {
        self.state_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average classification time per archive in milliseconds
    pub fn avg_classification_time_ms(&self) -> f64 {
        let total = self.total_classification_time_ms.load(Ordering::Relaxed);
        let count = self.archives_classified.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Repository Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Scans: {}, archives classified: {} (avg {:.2}ms), cache hits: {}, unreadable: {}",
            self.scans_completed.load(Ordering::Relaxed),
            self.archives_classified.load(Ordering::Relaxed),
            self.avg_classification_time_ms(),
            self.cache_hits.load(Ordering::Relaxed),
            self.unreadable_archives.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Notifications: {} processed, {} suppressed, {} busy retries",
            self.notifications_processed.load(Ordering::Relaxed),
            self.notifications_suppressed.load(Ordering::Relaxed),
            self.busy_retries.load(Ordering::Relaxed)
        );
        tracing::info!(
            "File operations: {} succeeded, {} failed",
            self.file_operations.load(Ordering::Relaxed),
            self.file_operation_failures.load(Ordering::Relaxed)
        );
        tracing::info!(
            "State updates: {}, broadcasts: {}",
            self.state_updates.load(Ordering::Relaxed),
            self.state_broadcasts.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
