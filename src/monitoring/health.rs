//! Health Checks
//!
//! Readiness derived from the last reconciliation cycle.

use serde::{Deserialize, Serialize};

use crate::cache::CacheStatsSnapshot;
use crate::reconcile::{CycleReport, Reconciler};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Last cycle persisted everything (or no cycle has run yet)
    Healthy,
    /// Last cycle left some keys unpersisted
    Degraded,
    /// Last cycle persisted nothing it attempted
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Status implied by a cycle report
    pub fn from_report(report: Option<&CycleReport>) -> Self {
        match report {
            None => HealthStatus::Healthy,
            Some(r) if r.is_clean() => HealthStatus::Healthy,
            Some(r) if r.attempted() > 0 && r.persisted() == 0 => HealthStatus::Unhealthy,
            Some(_) => HealthStatus::Degraded,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub cycles_completed: u64,
    pub cached_views: usize,
    pub cached_likes: usize,
    pub view_cache: CacheStatsSnapshot,
    pub like_cache: CacheStatsSnapshot,
    pub last_cycle: Option<CycleReport>,
}

impl HealthResponse {
    /// Current health of a reconciler and the caches it flushes
    pub fn from_reconciler(reconciler: &Reconciler) -> Self {
        let last_cycle = reconciler.last_report();

        Self {
            status: HealthStatus::from_report(last_cycle.as_ref()),
            version: crate::VERSION.to_string(),
            cycles_completed: reconciler.cycles_completed(),
            cached_views: reconciler.views().len(),
            cached_likes: reconciler.likes().len(),
            view_cache: reconciler.views().stats().snapshot(),
            like_cache: reconciler.likes().stats().snapshot(),
            last_cycle,
        }
    }
}
