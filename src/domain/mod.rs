//! Domain Layer
//!
//! Value objects shared by the caches and the reconciler, and the port
//! through which they reach durable storage.
//!
//! # Usage
//!
//! ```ignore
//! use board_counters::domain::{CountStore, CounterKind, PostId};
//!
//! async fn current_views<S: CountStore>(store: &S, id: PostId) -> Result<i64> {
//!     Ok(store.seed(CounterKind::View, id).await?.unwrap_or(0))
//! }
//! ```

pub mod ports;

pub use ports::{persist_each, CountStore, CounterKind, LikeAction, PostCounts, PostId};
