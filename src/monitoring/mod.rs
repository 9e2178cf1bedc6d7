//! Observability
//!
//! Prometheus metrics for the reconciler and a readiness view built from its
//! last cycle. Logging goes through `tracing` everywhere else.

mod health;
mod metrics;

pub use health::{HealthResponse, HealthStatus};
pub use metrics::ReconcileMetrics;
