//! Error types for the counter cache and its reconciliation job

use std::time::Duration;

use thiserror::Error;

use crate::domain::{CounterKind, PostId};

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while seeding or persisting counters
#[derive(Error, Debug)]
pub enum Error {
    /// Durable store error (seed read or connection failure)
    #[error("Count store error: {0}")]
    Store(String),

    /// A single counter write failed
    #[error("Failed to persist {kind} count for post {post_id}: {reason}")]
    PersistFailed {
        kind: CounterKind,
        post_id: PostId,
        reason: String,
    },

    /// Some keys of a bulk write failed; the rest were applied
    #[error("Bulk persist of {kind} counts failed for {} of {total} posts", failed.len())]
    PartialPersist {
        kind: CounterKind,
        failed: Vec<PostId>,
        total: usize,
    },

    /// Bulk write did not finish within the configured bound
    #[error("Bulk persist of {kind} counts timed out after {timeout:?}")]
    PersistTimeout { kind: CounterKind, timeout: Duration },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Posts whose values did not reach durable storage, if the error
    /// identifies them. `None` means the whole batch must be assumed lost.
    pub fn failed_posts(&self) -> Option<&[PostId]> {
        match self {
            Error::PartialPersist { failed, .. } => Some(failed),
            Error::PersistFailed { post_id, .. } => Some(std::slice::from_ref(post_id)),
            _ => None,
        }
    }
}
