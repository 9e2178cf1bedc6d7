//! Post Counters
//!
//! The calls request handlers make at each point of a post's lifecycle,
//! mapped onto the view and like caches.
//!
//! | Event            | Call                        | Cache effect                  |
//! |------------------|-----------------------------|-------------------------------|
//! | post created     | [`PostCounters::register_post`]   | `safe_put(0)` on both   |
//! | post viewed      | [`PostCounters::record_view`]     | view `increment`        |
//! | like / cancel    | [`PostCounters::apply_like`]      | like `increment`/`decrement` |
//! | list / detail    | [`PostCounters::counts`]          | `get` on both           |
//! | post deleted     | [`PostCounters::unregister_post`] | `remove` on both        |
//! | admin resync     | [`PostCounters::resync`]          | `force_put` on both     |

use std::sync::Arc;

use tracing::info;

use crate::cache::CounterCache;
use crate::domain::{CountStore, CounterKind, LikeAction, PostCounts, PostId};

/// View and like caches for all posts
#[derive(Debug, Clone)]
pub struct PostCounters {
    views: Arc<CounterCache>,
    likes: Arc<CounterCache>,
}

impl PostCounters {
    /// Build both caches over one store
    pub fn new(store: Arc<dyn CountStore>) -> Self {
        Self {
            views: Arc::new(CounterCache::new(CounterKind::View, store.clone())),
            likes: Arc::new(CounterCache::new(CounterKind::Like, store)),
        }
    }

    pub fn views(&self) -> &Arc<CounterCache> {
        &self.views
    }

    pub fn likes(&self) -> &Arc<CounterCache> {
        &self.likes
    }

    /// A post was viewed; returns the new view count
    pub async fn record_view(&self, post_id: PostId) -> i64 {
        self.views.increment(post_id).await
    }

    /// A like was added or cancelled; returns the new like count.
    ///
    /// The caller has already checked that a cancel matches an earlier like.
    pub async fn apply_like(&self, post_id: PostId, action: LikeAction) -> i64 {
        match action {
            LikeAction::Like => self.likes.increment(post_id).await,
            LikeAction::Cancel => self.likes.decrement(post_id).await,
        }
    }

    /// Current counts of a post
    pub async fn counts(&self, post_id: PostId) -> PostCounts {
        let (views, likes) = tokio::join!(self.views.get(post_id), self.likes.get(post_id));
        PostCounts { views, likes }
    }

    /// A post was created; start both counters at zero without a seed read
    pub fn register_post(&self, post_id: PostId) {
        self.views.safe_put(post_id, 0);
        self.likes.safe_put(post_id, 0);
    }

    /// A post was deleted; drop its counters
    pub fn unregister_post(&self, post_id: PostId) {
        self.views.remove(post_id);
        self.likes.remove(post_id);
    }

    /// Overwrite both counters of a post
    pub fn resync(&self, post_id: PostId, counts: PostCounts) {
        self.views.force_put(post_id, counts.views);
        self.likes.force_put(post_id, counts.likes);
    }

    /// Drop every cached counter
    pub fn reset(&self) {
        info!(
            views = self.views.len(),
            likes = self.likes.len(),
            "Resetting post counters"
        );
        self.views.clear();
        self.likes.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryCountStore;

    fn counters(store: &Arc<InMemoryCountStore>) -> PostCounters {
        PostCounters::new(store.clone())
    }

    #[tokio::test]
    async fn test_view_and_like_flow() {
        let store = Arc::new(InMemoryCountStore::with_rows([(
            PostId(1),
            PostCounts::new(10, 2),
        )]));
        let counters = counters(&store);

        assert_eq!(counters.record_view(PostId(1)).await, 11);
        assert_eq!(counters.apply_like(PostId(1), LikeAction::Like).await, 3);
        assert_eq!(counters.apply_like(PostId(1), LikeAction::Cancel).await, 2);

        assert_eq!(counters.counts(PostId(1)).await, PostCounts::new(11, 2));
    }

    #[tokio::test]
    async fn test_register_post_skips_seed_read() {
        let store = Arc::new(InMemoryCountStore::new());
        let counters = counters(&store);

        counters.register_post(PostId(5));

        assert_eq!(counters.counts(PostId(5)).await, PostCounts::default());
        assert_eq!(store.stats().seeds, 0);
    }

    #[tokio::test]
    async fn test_register_post_keeps_existing_counts() {
        let store = Arc::new(InMemoryCountStore::new());
        let counters = counters(&store);

        counters.record_view(PostId(5)).await;
        counters.register_post(PostId(5));

        assert_eq!(counters.views().get(PostId(5)).await, 1);
    }

    #[tokio::test]
    async fn test_unregister_post_drops_both() {
        let store = Arc::new(InMemoryCountStore::new());
        let counters = counters(&store);

        counters.record_view(PostId(1)).await;
        counters.apply_like(PostId(1), LikeAction::Like).await;
        counters.unregister_post(PostId(1));

        assert!(!counters.views().contains(PostId(1)));
        assert!(!counters.likes().contains(PostId(1)));
    }

    #[tokio::test]
    async fn test_resync_and_reset() {
        let store = Arc::new(InMemoryCountStore::new());
        let counters = counters(&store);

        counters.record_view(PostId(1)).await;
        counters.resync(PostId(1), PostCounts::new(40, 7));
        assert_eq!(counters.counts(PostId(1)).await, PostCounts::new(40, 7));

        counters.reset();
        assert!(counters.views().is_empty());
        assert!(counters.likes().is_empty());
    }
}
