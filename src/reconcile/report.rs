//! Cycle Reports
//!
//! What one reconciliation cycle did, per metric.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{CounterKind, PostId};

/// Result of persisting one metric's snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushSummary {
    /// Metric flushed
    pub kind: CounterKind,
    /// Posts in the snapshot
    pub attempted: usize,
    /// Posts written successfully
    pub persisted: usize,
    /// Posts whose write failed, retried next cycle
    pub failed: Vec<PostId>,
    /// Error reported by the store, if any
    pub error: Option<String>,
}

impl FlushSummary {
    /// Nothing to flush
    pub fn empty(kind: CounterKind) -> Self {
        Self {
            kind,
            attempted: 0,
            persisted: 0,
            failed: Vec::new(),
            error: None,
        }
    }

    /// Every key written
    pub fn complete(kind: CounterKind, attempted: usize) -> Self {
        Self {
            kind,
            attempted,
            persisted: attempted,
            failed: Vec::new(),
            error: None,
        }
    }

    /// Some or all keys failed
    pub fn failed(kind: CounterKind, attempted: usize, failed: Vec<PostId>, error: String) -> Self {
        Self {
            kind,
            attempted,
            persisted: attempted.saturating_sub(failed.len()),
            failed,
            error: Some(error),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.error.is_none()
    }
}

/// Result of one reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Sequence number, starting at 1
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub views: FlushSummary,
    pub likes: FlushSummary,
}

impl CycleReport {
    /// No failures in either metric
    pub fn is_clean(&self) -> bool {
        self.views.is_clean() && self.likes.is_clean()
    }

    pub fn attempted(&self) -> usize {
        self.views.attempted + self.likes.attempted
    }

    pub fn persisted(&self) -> usize {
        self.views.persisted + self.likes.persisted
    }

    pub fn failed(&self) -> usize {
        self.views.failed.len() + self.likes.failed.len()
    }

    pub fn summary(&self, kind: CounterKind) -> &FlushSummary {
        match kind {
            CounterKind::View => &self.views,
            CounterKind::Like => &self.likes,
        }
    }
}

/// What [`Reconciler::run_cycle`](super::Reconciler::run_cycle) did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Snapshots were taken and persisted (possibly with failures)
    Completed(CycleReport),
    /// Another cycle was still in flight
    Skipped,
}

impl CycleOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Completed(report) => Some(report),
            CycleOutcome::Skipped => None,
        }
    }
}
