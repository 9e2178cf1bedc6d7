//! Cache Statistics
//!
//! Lock-free hit/miss accounting for one counter cache.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated on the foreground path
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    seed_failures: AtomicU64,
    force_puts: AtomicU64,
    removals: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_seed_failure(&self) {
        self.seed_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_force_put(&self) {
        self.force_puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn seed_failures(&self) -> u64 {
        self.seed_failures.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            seed_failures: self.seed_failures(),
            force_puts: self.force_puts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// Serializable copy of [`CacheStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub seed_failures: u64,
    pub force_puts: u64,
    pub removals: u64,
    pub hit_ratio: f64,
}
