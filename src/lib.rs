//! Board Counters - Write-Back View/Like Counter Cache
//!
//! In-memory, concurrently updated view and like counters for the posts of a
//! community board, with a background job that reconciles them into durable
//! storage.
//!
//! # Architecture
//!
//! ```text
//! request handlers ──▶ PostCounters ──▶ CounterCache (views) ─┐
//!                                   └─▶ CounterCache (likes) ─┤
//!                                                              │ seed on miss
//!                  Reconciler (every interval) ── snapshot ──▶ CountStore
//! ```
//!
//! The caches are the source of truth. Durable storage lags by at most one
//! reconciliation interval and is only read when a post is first touched.
//!
//! # Modules
//!
//! - [`adapters`] - In-memory implementation of the store port
//! - [`cache`] - Concurrent per-post counters
//! - [`domain`] - Value objects and the `CountStore` port
//! - [`error`] - Error types
//! - [`monitoring`] - Prometheus metrics and health
//! - [`reconcile`] - Periodic flush to durable storage
//! - [`service`] - Post lifecycle facade over both caches

pub mod adapters;
pub mod cache;
pub mod domain;
pub mod error;
pub mod monitoring;
pub mod reconcile;
pub mod service;

// Re-export commonly used types
pub use adapters::InMemoryCountStore;
pub use cache::CounterCache;
pub use domain::{CountStore, CounterKind, LikeAction, PostCounts, PostId};
pub use error::{Error, Result};
pub use reconcile::{CycleOutcome, CycleReport, Reconciler, ReconcilerConfig};
pub use service::PostCounters;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
