//! Reconciliation
//!
//! Background job that keeps durable storage in eventual agreement with the
//! counter caches. The caches stay authoritative; a cycle only copies their
//! values out, so a failed cycle is repaired by the next one.

mod report;
mod scheduler;

pub use report::{CycleOutcome, CycleReport, FlushSummary};
pub use scheduler::{
    Reconciler, ReconcilerConfig, DEFAULT_PERSIST_TIMEOUT, DEFAULT_RECONCILE_INTERVAL,
};
