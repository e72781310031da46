//! Cache statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for how calls were served
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    partial_hits: AtomicU64,
    misses: AtomicU64,
    pass_throughs: AtomicU64,
    mutations: AtomicU64,
    uncacheable: AtomicU64,
    entries_written: AtomicU64,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read served entirely from the store
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a read that needed a remainder fetch
    pub fn record_partial_hit(&self) {
        self.partial_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a read with nothing usable in the store
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call forwarded verbatim
    pub fn record_pass_through(&self) {
        self.pass_throughs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a recognized mutation
    pub fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record items left out of the store for lack of an identifier
    pub fn record_uncacheable(&self, count: u64) {
        self.uncacheable.fetch_add(count, Ordering::Relaxed);
    }

    /// Record normalized entries written
    pub fn record_entries(&self, count: u64) {
        self.entries_written.fetch_add(count, Ordering::Relaxed);
    }

    /// Get total hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get total partial hits
    pub fn partial_hits(&self) -> u64 {
        self.partial_hits.load(Ordering::Relaxed)
    }

    /// Get total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get total pass-throughs
    pub fn pass_throughs(&self) -> u64 {
        self.pass_throughs.load(Ordering::Relaxed)
    }

    /// Get total mutations
    pub fn mutations(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    /// Get total uncacheable items
    pub fn uncacheable(&self) -> u64 {
        self.uncacheable.load(Ordering::Relaxed)
    }

    /// Get total entries written
    pub fn entries_written(&self) -> u64 {
        self.entries_written.load(Ordering::Relaxed)
    }

    /// Fraction of reads served without any fetch (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.partial_hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.partial_hits,
            &self.misses,
            &self.pass_throughs,
            &self.mutations,
            &self.uncacheable,
            &self.entries_written,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = CacheStats::new();

        stats.record_hit();
        stats.record_hit();
        stats.record_partial_hit();
        stats.record_miss();
        stats.record_pass_through();

        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.partial_hits(), 1);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.pass_throughs(), 1);
        assert_eq!(stats.hit_ratio(), 0.5);
    }

    #[test]
    fn test_stats_reset() {
        let stats = CacheStats::new();

        stats.record_hit();
        stats.record_mutation();
        stats.record_uncacheable(3);
        stats.record_entries(7);
        stats.reset();

        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.mutations(), 0);
        assert_eq!(stats.uncacheable(), 0);
        assert_eq!(stats.entries_written(), 0);
        assert_eq!(stats.hit_ratio(), 0.0);
    }
}
