//! Write-Back Counter Caches
//!
//! In-memory, concurrently updated per-post counters. The caches are the
//! live source of truth; durable storage catches up on every reconciliation
//! cycle.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  request handlers                                                     │
//! │     record_view / apply_like / counts / register / unregister         │
//! └───────────────┬──────────────────────────────────┬───────────────────┘
//!                 ▼                                  ▼
//!   ┌──────────────────────────┐       ┌──────────────────────────┐
//!   │ CounterCache (views)     │       │ CounterCache (likes)     │
//!   │ DashMap<PostId, AtomicI64>│      │ DashMap<PostId, AtomicI64>│
//!   └─────────────┬────────────┘       └─────────────┬────────────┘
//!                 │ seed on miss / snapshot           │
//!                 ▼                                   ▼
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ CountStore (durable)  ◀── Reconciler bulk persist every tick  │
//!   └──────────────────────────────────────────────────────────────┘
//! ```

mod counter;
mod proptest;
mod stats;

pub use counter::CounterCache;
pub use stats::{CacheStats, CacheStatsSnapshot};
