//! In-Memory Count Store
//!
//! Implements the `CountStore` port over a DashMap of per-post count rows.
//! Records every seed read and bulk write so tests can assert on traffic,
//! and can be told to fail or slow down writes for chosen posts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tracing::debug;

use crate::domain::ports::{persist_each, CountStore, CounterKind, PostCounts, PostId};
use crate::error::{Error, Result};

/// A bulk write as received by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistBatch {
    pub kind: CounterKind,
    pub counts: HashMap<PostId, i64>,
}

/// Traffic counters of an [`InMemoryCountStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryStoreStats {
    /// Stored rows
    pub row_count: u64,
    /// Seed reads
    pub seeds: u64,
    /// Single-key writes that succeeded
    pub writes: u64,
    /// Single-key writes that found no row
    pub skipped_writes: u64,
    /// Single-key writes that failed
    pub failed_writes: u64,
    /// Bulk write calls
    pub bulk_writes: u64,
}

/// DashMap-backed count store.
#[derive(Default)]
pub struct InMemoryCountStore {
    /// post -> durable counts row
    rows: DashMap<PostId, PostCounts>,
    /// Posts whose writes are rejected
    failing: DashSet<PostId>,
    /// Seed reads return an error while set
    seed_outage: AtomicBool,
    /// Artificial delay applied to each bulk write
    bulk_delay: Mutex<Duration>,
    /// Bulk writes in arrival order
    batches: Mutex<Vec<PersistBatch>>,
    /// Seed reads per (metric, post)
    seed_calls: DashMap<(CounterKind, PostId), u64>,
    seeds: AtomicU64,
    writes: AtomicU64,
    skipped_writes: AtomicU64,
    failed_writes: AtomicU64,
}

impl InMemoryCountStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with rows
    pub fn with_rows(rows: impl IntoIterator<Item = (PostId, PostCounts)>) -> Self {
        let store = Self::new();
        for (post_id, counts) in rows {
            store.insert_row(post_id, counts);
        }
        store
    }

    /// Insert or replace the durable row for a post
    pub fn insert_row(&self, post_id: PostId, counts: PostCounts) {
        self.rows.insert(post_id, counts);
    }

    /// Delete the row of a post, as the data layer does on post deletion
    pub fn remove_row(&self, post_id: PostId) -> Option<PostCounts> {
        self.rows.remove(&post_id).map(|(_, row)| row)
    }

    /// Durable row for a post
    pub fn row(&self, post_id: PostId) -> Option<PostCounts> {
        self.rows.get(&post_id).map(|r| *r)
    }

    /// Durable value of one metric for a post
    pub fn value(&self, kind: CounterKind, post_id: PostId) -> Option<i64> {
        self.row(post_id).map(|r| r.get(kind))
    }

    /// Reject writes for `post_id` until [`heal`](Self::heal) is called
    pub fn fail_writes_for(&self, post_id: PostId) {
        self.failing.insert(post_id);
    }

    /// Accept writes for `post_id` again
    pub fn heal(&self, post_id: PostId) {
        self.failing.remove(&post_id);
    }

    /// Toggle a simulated outage of seed reads
    pub fn set_seed_outage(&self, down: bool) {
        self.seed_outage.store(down, Ordering::Relaxed);
    }

    /// Delay every bulk write by `delay`
    pub fn set_bulk_delay(&self, delay: Duration) {
        *self.bulk_delay.lock() = delay;
    }

    /// Seed reads issued for one metric of one post
    pub fn seed_calls(&self, kind: CounterKind, post_id: PostId) -> u64 {
        self.seed_calls
            .get(&(kind, post_id))
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// All bulk writes received so far
    pub fn batches(&self) -> Vec<PersistBatch> {
        self.batches.lock().clone()
    }

    /// Bulk writes received for one metric
    pub fn batches_for(&self, kind: CounterKind) -> Vec<PersistBatch> {
        self.batches
            .lock()
            .iter()
            .filter(|b| b.kind == kind)
            .cloned()
            .collect()
    }

    /// Traffic statistics
    pub fn stats(&self) -> InMemoryStoreStats {
        InMemoryStoreStats {
            row_count: self.rows.len() as u64,
            seeds: self.seeds.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            skipped_writes: self.skipped_writes.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            bulk_writes: self.batches.lock().len() as u64,
        }
    }
}

#[async_trait]
impl CountStore for InMemoryCountStore {
    async fn seed(&self, kind: CounterKind, post_id: PostId) -> Result<Option<i64>> {
        self.seeds.fetch_add(1, Ordering::Relaxed);
        *self.seed_calls.entry((kind, post_id)).or_insert(0) += 1;

        if self.seed_outage.load(Ordering::Relaxed) {
            return Err(Error::Store(format!(
                "seed read for post {} unavailable",
                post_id
            )));
        }

        Ok(self.value(kind, post_id))
    }

    async fn persist(&self, kind: CounterKind, post_id: PostId, value: i64) -> Result<()> {
        if self.failing.contains(&post_id) {
            self.failed_writes.fetch_add(1, Ordering::Relaxed);
            return Err(Error::PersistFailed {
                kind,
                post_id,
                reason: "write rejected".to_string(),
            });
        }

        // UPDATE semantics: a deleted post stays deleted
        match self.rows.get_mut(&post_id) {
            Some(mut row) => {
                row.set(kind, value);
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.skipped_writes.fetch_add(1, Ordering::Relaxed);
                debug!(%kind, %post_id, "No row for post, write ignored");
            }
        }
        Ok(())
    }

    async fn bulk_persist(&self, kind: CounterKind, counts: &HashMap<PostId, i64>) -> Result<()> {
        self.batches.lock().push(PersistBatch {
            kind,
            counts: counts.clone(),
        });

        let delay = *self.bulk_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        persist_each(self, kind, counts).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seed_reads_selected_field() {
        let store = InMemoryCountStore::with_rows([(PostId(1), PostCounts::new(12, 4))]);

        assert_eq!(store.seed(CounterKind::View, PostId(1)).await.unwrap(), Some(12));
        assert_eq!(store.seed(CounterKind::Like, PostId(1)).await.unwrap(), Some(4));
        assert_eq!(store.seed(CounterKind::View, PostId(2)).await.unwrap(), None);

        assert_eq!(store.seed_calls(CounterKind::View, PostId(1)), 1);
        assert_eq!(store.seed_calls(CounterKind::Like, PostId(1)), 1);
        assert_eq!(store.stats().seeds, 3);
    }

    #[tokio::test]
    async fn test_seed_outage() {
        let store = InMemoryCountStore::new();
        store.set_seed_outage(true);

        let err = store.seed(CounterKind::View, PostId(1)).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));

        store.set_seed_outage(false);
        assert!(store.seed(CounterKind::View, PostId(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_persist_updates_only_one_field() {
        let store = InMemoryCountStore::with_rows([(PostId(1), PostCounts::new(5, 2))]);

        store.persist(CounterKind::Like, PostId(1), 3).await.unwrap();

        assert_eq!(store.row(PostId(1)), Some(PostCounts::new(5, 3)));
    }

    #[tokio::test]
    async fn test_persist_is_idempotent() {
        let store = InMemoryCountStore::with_rows([(PostId(9), PostCounts::default())]);

        store.persist(CounterKind::View, PostId(9), 7).await.unwrap();
        store.persist(CounterKind::View, PostId(9), 7).await.unwrap();

        assert_eq!(store.value(CounterKind::View, PostId(9)), Some(7));
        assert_eq!(store.stats().row_count, 1);
    }

    #[tokio::test]
    async fn test_persist_without_row_is_ignored() {
        let store = InMemoryCountStore::new();

        store.persist(CounterKind::Like, PostId(3), 4).await.unwrap();

        assert_eq!(store.row(PostId(3)), None);
        let stats = store.stats();
        assert_eq!(stats.row_count, 0);
        assert_eq!(stats.writes, 0);
        assert_eq!(stats.skipped_writes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_delay() {
        let store = InMemoryCountStore::with_rows([(PostId(1), PostCounts::default())]);
        store.set_bulk_delay(Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        let counts = HashMap::from([(PostId(1), 2)]);
        store.bulk_persist(CounterKind::View, &counts).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(store.value(CounterKind::View, PostId(1)), Some(2));
    }

    #[tokio::test]
    async fn test_bulk_persist_records_batch_and_failures() {
        let store = InMemoryCountStore::with_rows([
            (PostId(1), PostCounts::default()),
            (PostId(2), PostCounts::default()),
        ]);
        store.fail_writes_for(PostId(2));

        let counts: HashMap<PostId, i64> = [(PostId(1), 8), (PostId(2), 3)].into_iter().collect();
        let err = store
            .bulk_persist(CounterKind::View, &counts)
            .await
            .unwrap_err();

        assert_eq!(err.failed_posts(), Some(&[PostId(2)][..]));
        assert_eq!(store.value(CounterKind::View, PostId(1)), Some(8));
        assert_eq!(store.value(CounterKind::View, PostId(2)), Some(0));

        let batches = store.batches_for(CounterKind::View);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].counts, counts);

        let stats = store.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.failed_writes, 1);
        assert_eq!(stats.bulk_writes, 1);

        store.heal(PostId(2));
        store.bulk_persist(CounterKind::View, &counts).await.unwrap();
        assert_eq!(store.value(CounterKind::View, PostId(2)), Some(3));
    }
}
