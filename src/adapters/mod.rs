//! Infrastructure Adapters
//!
//! Implementations of the domain ports. The relational implementation lives
//! with the data-access layer of the board backend; this crate ships the
//! in-memory store used by tests and by the standalone binary.
//!
//! # Usage
//!
//! ```ignore
//! use board_counters::adapters::InMemoryCountStore;
//! use board_counters::domain::{CountStore, CounterKind, PostCounts, PostId};
//!
//! let store = InMemoryCountStore::with_rows([(PostId(1), PostCounts::new(5, 0))]);
//! let views = store.seed(CounterKind::View, PostId(1)).await?;
//! ```

mod in_memory;

pub use in_memory::{InMemoryCountStore, InMemoryStoreStats, PersistBatch};
