//! Domain Ports (Port/Adapter Pattern)
//!
//! The counter cache depends on durable storage through exactly one port,
//! [`CountStore`]. The relational data layer implements it; tests and the
//! demo binary use [`crate::adapters::InMemoryCountStore`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Counter Cache                           │
//! │   CounterCache (views)   CounterCache (likes)   Reconciler   │
//! └─────────────────────────────────────────────────────────────┘
//!              │ seed on miss               │ bulk persist
//!              ▼                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CountStore (this port)                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

// =============================================================================
// Value Objects
// =============================================================================

/// Post identifier (value object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostId(pub i64);

impl PostId {
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which per-post metric a cache or a store call refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    /// View count, only ever incremented
    View,
    /// Like count, incremented and decremented
    Like,
}

impl CounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::View => "view",
            CounterKind::Like => "like",
        }
    }
}

impl std::fmt::Display for CounterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Both counters of one post, as stored in a single durable row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCounts {
    pub views: i64,
    pub likes: i64,
}

impl PostCounts {
    pub fn new(views: i64, likes: i64) -> Self {
        Self { views, likes }
    }

    /// Select the field for one metric.
    pub fn get(&self, kind: CounterKind) -> i64 {
        match kind {
            CounterKind::View => self.views,
            CounterKind::Like => self.likes,
        }
    }

    /// Overwrite the field for one metric.
    pub fn set(&mut self, kind: CounterKind, value: i64) {
        match kind {
            CounterKind::View => self.views = value,
            CounterKind::Like => self.likes = value,
        }
    }
}

/// Direction of a like toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LikeAction {
    Like,
    Cancel,
}

// =============================================================================
// Count Store Port
// =============================================================================

/// Port for the durable side of the write-back cache.
///
/// Implementations must be idempotent: writing the same value for a post
/// twice has no effect beyond the last write.
///
/// # Example
///
/// ```ignore
/// struct PostgresCountStore { pool: PgPool }
///
/// #[async_trait]
/// impl CountStore for PostgresCountStore {
///     async fn seed(&self, kind: CounterKind, post_id: PostId) -> Result<Option<i64>> {
///         // SELECT view_count, like_count FROM post WHERE id = $1
///     }
///
///     async fn persist(&self, kind: CounterKind, post_id: PostId, value: i64) -> Result<()> {
///         // UPDATE post SET view_count = $2 WHERE id = $1
///     }
/// }
/// ```
#[async_trait]
pub trait CountStore: Send + Sync {
    /// Durable value of one counter, or `None` if the post has no count yet.
    async fn seed(&self, kind: CounterKind, post_id: PostId) -> Result<Option<i64>>;

    /// Write a single counter value.
    async fn persist(&self, kind: CounterKind, post_id: PostId, value: i64) -> Result<()>;

    /// Write every value in `counts`.
    ///
    /// Keys are applied independently: a failing key does not stop or undo
    /// the others. When any key fails the error is
    /// [`Error::PartialPersist`] listing the failed posts.
    async fn bulk_persist(&self, kind: CounterKind, counts: &HashMap<PostId, i64>) -> Result<()> {
        persist_each(self, kind, counts).await
    }
}

/// Apply `counts` one key at a time through [`CountStore::persist`],
/// collecting the posts whose write failed.
///
/// This is the body of the default `bulk_persist`; adapters that override
/// `bulk_persist` for bookkeeping can still delegate here.
pub async fn persist_each<S>(store: &S, kind: CounterKind, counts: &HashMap<PostId, i64>) -> Result<()>
where
    S: CountStore + ?Sized,
{
    let mut failed = Vec::new();

    for (&post_id, &value) in counts {
        if let Err(e) = store.persist(kind, post_id, value).await {
            warn!(%kind, %post_id, value, error = %e, "Counter write failed");
            failed.push(post_id);
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        failed.sort();
        Err(Error::PartialPersist {
            kind,
            failed,
            total: counts.len(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
