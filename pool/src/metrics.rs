//! Pool bookkeeping counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Pool counters.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Total successful borrows.
    pub borrows: AtomicU64,
    /// Total returns (explicit releases and drops).
    pub releases: AtomicU64,
    /// Returns that skipped the explicit release path.
    pub dirty_returns: AtomicU64,
    /// Connections reset to default session state.
    pub resets: AtomicU64,
    /// Failed resets.
    pub reset_failures: AtomicU64,
    /// Borrows that gave up waiting.
    pub timeouts: AtomicU64,
    /// Connections currently lent out.
    pub in_use: AtomicU64,
    /// Highest number of connections lent out at once.
    pub peak_in_use: AtomicU64,
}

impl PoolMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection handed to a borrower.
    pub fn borrowed(&self) {
        self.borrows.fetch_add(1, Ordering::Relaxed);
        let in_use = self.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_use.fetch_max(in_use, Ordering::AcqRel);
    }

    /// Record a connection coming back.
    pub fn returned(&self, dirty: bool) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        if dirty {
            self.dirty_returns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a reset attempt.
    pub fn reset(&self, ok: bool) {
        if ok {
            self.resets.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reset_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a borrow timeout.
    pub fn timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self, size: usize, idle: usize) -> PoolStats {
        PoolStats {
            size,
            idle,
            in_use: self.in_use.load(Ordering::Acquire),
            peak_in_use: self.peak_in_use.load(Ordering::Acquire),
            borrows: self.borrows.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            dirty_returns: self.dirty_returns.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            reset_failures: self.reset_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub in_use: u64,
    pub peak_in_use: u64,
    pub borrows: u64,
    pub releases: u64,
    pub dirty_returns: u64,
    pub resets: u64,
    pub reset_failures: u64,
    pub timeouts: u64,
}
