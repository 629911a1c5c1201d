//! Cache Statistics Module
//!
//! Tracks hits, misses, evictions, expirations and disposal failures.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cache::events::RemovalCause;

// == Stats Counter ==
/// Atomic counters updated on every cache operation.
#[derive(Debug, Default)]
pub struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    disposal_failures: AtomicU64,
}

impl StatsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a removal under the bucket its cause belongs to.
    pub fn record_removal(&self, cause: RemovalCause) {
        if cause.is_eviction() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        } else if matches!(cause, RemovalCause::Expired | RemovalCause::Disposed) {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_disposal_failure(&self) {
        self.disposal_failures.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Returns a point-in-time copy; `total_entries` and `total_size` come
    /// from the store.
    pub fn snapshot(&self, total_entries: usize, total_size: i64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            disposal_failures: self.disposal_failures.load(Ordering::Relaxed),
            total_entries,
            total_size,
        }
    }
}

// == Cache Stats ==
/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key not found or expired)
    pub misses: u64,
    /// Entries removed by count, size, age, idle or memory reduction
    pub evictions: u64,
    /// Entries removed because they expired or their item disposed itself
    pub expirations: u64,
    /// Item disposals that raised an error
    pub disposal_failures: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
    /// Current sum of entry sizes
    pub total_size: i64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = StatsCounter::new().snapshot(0, 0);
        assert_eq!(stats, CacheStats::default());
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let counter = StatsCounter::new();
        counter.record_hit();
        counter.record_miss();
        assert_eq!(counter.snapshot(0, 0).hit_rate(), 0.5);
    }

    #[test]
    fn test_removal_buckets() {
        let counter = StatsCounter::new();
        counter.record_removal(RemovalCause::Capacity);
        counter.record_removal(RemovalCause::Aged);
        counter.record_removal(RemovalCause::Expired);
        counter.record_removal(RemovalCause::Explicit);
        counter.record_disposal_failure();

        let stats = counter.snapshot(3, 42);
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.disposal_failures, 1);
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.total_size, 42);
    }
}
