//! Counter Cache - per-post write-back counters
//!
//! One instance per metric. Counters live in a DashMap of `AtomicI64`, so
//! once an entry exists every operation is a single atomic instruction under
//! a shard read guard. The durable store is touched only on a miss, and no
//! map guard is ever held across that await.
//!
//! # Miss Handling
//!
//! ```text
//! get/increment/decrement(id)
//!        │
//!        ├── present ──▶ atomic load / fetch_add
//!        │
//!        └── absent ──▶ store.seed(kind, id).await   (None => 0)
//!                              │
//!                              ├── Err ──▶ answer from 0, nothing cached
//!                              ▼
//!                       entry(id).or_insert(seed)    first insert wins
//!                              │
//!                              ▼
//!                       atomic load / fetch_add on the retained entry
//! ```
//!
//! Two tasks missing on the same key may both call `seed`; only the first
//! inserted entry survives and the other task applies its delta to it.
//!
//! A failed seed never creates an entry. Caching a guessed 0 would later be
//! flushed over the real durable count, so the next access seeds again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::stats::CacheStats;
use crate::domain::{CountStore, CounterKind, PostId};

/// Concurrent map of post id to counter for one metric
pub struct CounterCache {
    kind: CounterKind,
    entries: DashMap<PostId, AtomicI64>,
    store: Arc<dyn CountStore>,
    stats: CacheStats,
}

impl CounterCache {
    /// Create an empty cache for `kind`, seeding misses from `store`
    pub fn new(kind: CounterKind, store: Arc<dyn CountStore>) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
            store,
            stats: CacheStats::new(),
        }
    }

    /// Metric this cache holds
    pub fn kind(&self) -> CounterKind {
        self.kind
    }

    /// Current value, seeding the entry from the store on a miss
    pub async fn get(&self, post_id: PostId) -> i64 {
        if let Some(counter) = self.entries.get(&post_id) {
            self.stats.record_hit();
            return counter.load(Ordering::Acquire);
        }

        match self.seed(post_id).await {
            Some(seed) => self
                .entries
                .entry(post_id)
                .or_insert_with(|| AtomicI64::new(seed))
                .load(Ordering::Acquire),
            None => self
                .entries
                .get(&post_id)
                .map(|counter| counter.load(Ordering::Acquire))
                .unwrap_or(0),
        }
    }

    /// Add one and return the new value
    pub async fn increment(&self, post_id: PostId) -> i64 {
        let value = self.add(post_id, 1).await;
        debug!(kind = %self.kind, %post_id, value, "Counter incremented");
        value
    }

    /// Subtract one and return the new value.
    ///
    /// There is no floor: callers only decrement after a matching increment.
    pub async fn decrement(&self, post_id: PostId) -> i64 {
        let value = self.add(post_id, -1).await;
        debug!(kind = %self.kind, %post_id, value, "Counter decremented");
        value
    }

    /// Insert `value` only if the post has no entry yet.
    ///
    /// Returns `true` when the value was inserted.
    pub fn safe_put(&self, post_id: PostId, value: i64) -> bool {
        let mut inserted = false;
        self.entries.entry(post_id).or_insert_with(|| {
            inserted = true;
            AtomicI64::new(value)
        });
        inserted
    }

    /// Overwrite the entry unconditionally, returning the previous value
    pub fn force_put(&self, post_id: PostId, value: i64) -> Option<i64> {
        info!(kind = %self.kind, %post_id, value, "Counter force-refreshed");
        self.stats.record_force_put();
        self.entries
            .insert(post_id, AtomicI64::new(value))
            .map(|old| old.into_inner())
    }

    /// Drop the entry for a deleted post
    pub fn remove(&self, post_id: PostId) -> Option<i64> {
        let removed = self
            .entries
            .remove(&post_id)
            .map(|(_, counter)| counter.into_inner());

        if let Some(value) = removed {
            self.stats.record_removal();
            debug!(kind = %self.kind, %post_id, value, "Counter removed");
        }

        removed
    }

    /// Drop every entry
    pub fn clear(&self) {
        info!(kind = %self.kind, entries = self.entries.len(), "Counter cache cleared");
        self.entries.clear();
    }

    /// Number of cached posts
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, post_id: PostId) -> bool {
        self.entries.contains_key(&post_id)
    }

    /// Copy of every cached value.
    ///
    /// Entries are read one at a time, so increments racing with the copy
    /// may or may not be included.
    pub fn snapshot(&self) -> HashMap<PostId, i64> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Acquire)))
            .collect()
    }

    /// Foreground statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    async fn add(&self, post_id: PostId, delta: i64) -> i64 {
        if let Some(counter) = self.entries.get(&post_id) {
            self.stats.record_hit();
            return counter.fetch_add(delta, Ordering::AcqRel) + delta;
        }

        let Some(seed) = self.seed(post_id).await else {
            // Another task may have seeded while this one waited
            if let Some(counter) = self.entries.get(&post_id) {
                return counter.fetch_add(delta, Ordering::AcqRel) + delta;
            }
            warn!(kind = %self.kind, %post_id, delta, "Update dropped, post has no seeded counter");
            return delta;
        };

        let counter = self
            .entries
            .entry(post_id)
            .or_insert_with(|| AtomicI64::new(seed));
        counter.fetch_add(delta, Ordering::AcqRel) + delta
    }

    /// Durable value to start a new entry from.
    ///
    /// `None` when the store could not be read; the caller must not cache.
    async fn seed(&self, post_id: PostId) -> Option<i64> {
        self.stats.record_miss();

        match self.store.seed(self.kind, post_id).await {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                debug!(kind = %self.kind, %post_id, "No durable count, seeding with 0");
                Some(0)
            }
            Err(e) => {
                self.stats.record_seed_failure();
                warn!(kind = %self.kind, %post_id, error = %e, "Seed read failed, not caching");
                None
            }
        }
    }
}

impl std::fmt::Debug for CounterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterCache")
            .field("kind", &self.kind)
            .field("entries", &self.entries.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
