//! Database metrics for observability.
//!
//! Tracks statistics about allocator and batch activity for monitoring
//! and debugging.

use std::sync::atomic::{AtomicU64, Ordering};

/// Database metrics container.
///
/// All counters are atomic for thread-safe access.
#[derive(Debug, Default)]
pub struct DbMetrics {
    /// Number of pages allocated fresh from the watermark.
    pub pages_allocated: AtomicU64,
    /// Number of pages reused from the abandoned pool.
    pub pages_reused: AtomicU64,
    /// Number of pages superseded by copy-on-write.
    pub pages_abandoned: AtomicU64,
    /// Number of page reads from the backing map.
    pub page_reads: AtomicU64,
    /// Number of pages written at commit.
    pub page_writes: AtomicU64,
    /// Number of COW operations (get_writable_copy).
    pub cow_operations: AtomicU64,
    /// Number of batches committed.
    pub batches_committed: AtomicU64,
    /// Number of batches aborted.
    pub batches_aborted: AtomicU64,
}

impl DbMetrics {
    /// Creates a new metrics container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the page allocation counter.
    pub fn inc_pages_allocated(&self) {
        self.pages_allocated.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the page reuse counter.
    pub fn inc_pages_reused(&self) {
        self.pages_reused.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the page abandoned counter.
    pub fn inc_pages_abandoned(&self) {
        self.pages_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the page read counter.
    pub fn inc_page_reads(&self) {
        self.page_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds to the page writes counter.
    pub fn add_page_writes(&self, count: u64) {
        self.page_writes.fetch_add(count, Ordering::Relaxed);
    }

    /// Increments the COW operation counter.
    pub fn inc_cow_operations(&self) {
        self.cow_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the batch committed counter.
    pub fn inc_batches_committed(&self) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the batch aborted counter.
    pub fn inc_batches_aborted(&self) {
        self.batches_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_allocated: self.pages_allocated.load(Ordering::Relaxed),
            pages_reused: self.pages_reused.load(Ordering::Relaxed),
            pages_abandoned: self.pages_abandoned.load(Ordering::Relaxed),
            page_reads: self.page_reads.load(Ordering::Relaxed),
            page_writes: self.page_writes.load(Ordering::Relaxed),
            cow_operations: self.cow_operations.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_aborted: self.batches_aborted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the metrics counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub pages_allocated: u64,
    pub pages_reused: u64,
    pub pages_abandoned: u64,
    pub page_reads: u64,
    pub page_writes: u64,
    pub cow_operations: u64,
    pub batches_committed: u64,
    pub batches_aborted: u64,
}
