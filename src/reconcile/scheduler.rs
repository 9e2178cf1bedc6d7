//! Reconciler - periodic flush of cached counts to durable storage
//!
//! # Cycle
//!
//! ```text
//!  tick ──▶ acquire in-flight guard ──(held)──▶ Skipped
//!                  │
//!                  ▼
//!        snapshot(views), snapshot(likes)        copies, no locks kept
//!                  │
//!                  ▼
//!        bulk_persist(view, snapshot)  ≤ persist_timeout
//!        bulk_persist(like, snapshot)  ≤ persist_timeout
//!                  │
//!                  ▼
//!            CycleReport (entries stay cached)
//! ```
//!
//! Failed keys are not retried within the cycle. The cache still holds
//! them, so the next cycle writes their current value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::report::{CycleOutcome, CycleReport, FlushSummary};
use crate::cache::CounterCache;
use crate::domain::{CountStore, CounterKind, PostId};
use crate::error::{Error, Result};
use crate::monitoring::ReconcileMetrics;
use crate::service::PostCounters;

/// Default time between cycles
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on one metric's bulk write
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between cycles
    pub interval: Duration,

    /// Upper bound on each metric's bulk write
    pub persist_timeout: Duration,

    /// Run one last cycle when the loop is cancelled
    pub flush_on_shutdown: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONCILE_INTERVAL,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            flush_on_shutdown: true,
        }
    }
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("reconcile interval must be non-zero".into()));
        }
        if self.persist_timeout.is_zero() {
            return Err(Error::Config("persist timeout must be non-zero".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Releases the in-flight flag when a cycle ends, even if it is cancelled.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Flushes the view and like caches to the count store on a fixed interval
pub struct Reconciler {
    config: ReconcilerConfig,
    views: Arc<CounterCache>,
    likes: Arc<CounterCache>,
    store: Arc<dyn CountStore>,
    metrics: Option<ReconcileMetrics>,
    in_flight: AtomicBool,
    cycles: AtomicU64,
    last_report: RwLock<Option<CycleReport>>,
}

impl Reconciler {
    /// Create a reconciler over the caches of `counters`
    pub fn new(
        config: ReconcilerConfig,
        counters: &PostCounters,
        store: Arc<dyn CountStore>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            views: counters.views().clone(),
            likes: counters.likes().clone(),
            store,
            metrics: None,
            in_flight: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            last_report: RwLock::new(None),
        })
    }

    /// Record cycle outcomes in `metrics`
    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn views(&self) -> &Arc<CounterCache> {
        &self.views
    }

    pub fn likes(&self) -> &Arc<CounterCache> {
        &self.likes
    }

    /// Cycles that ran to completion (with or without failures)
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Report of the most recent completed cycle
    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().clone()
    }

    /// Whether a cycle is persisting right now
    pub fn is_running_cycle(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run the reconciler until `shutdown` is cancelled.
    ///
    /// The first cycle runs one interval after start. Ticks missed while a
    /// slow cycle was persisting are skipped rather than replayed.
    #[instrument(skip(self, shutdown))]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            persist_timeout_secs = self.config.persist_timeout.as_secs_f64(),
            "Starting counter reconciler"
        );

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval() fires immediately; the caches are empty at startup
        tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Counter reconciler shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        if self.config.flush_on_shutdown {
            info!("Flushing cached counts before exit");
            self.run_cycle().await;
        }
    }

    /// Snapshot both caches and persist them.
    ///
    /// Returns [`CycleOutcome::Skipped`] without touching the store when
    /// another cycle is still in flight.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            warn!("Previous reconciliation cycle still running, skipping");
            let outcome = CycleOutcome::Skipped;
            if let Some(metrics) = &self.metrics {
                metrics.observe(&outcome);
            }
            return outcome;
        };

        let started_at = Utc::now();
        let started = Instant::now();
        info!("Reconciliation cycle started");

        let view_counts = self.views.snapshot();
        let like_counts = self.likes.snapshot();

        if let Some(metrics) = &self.metrics {
            metrics.set_cached_entries(CounterKind::View, view_counts.len());
            metrics.set_cached_entries(CounterKind::Like, like_counts.len());
            metrics.set_cache_stats(&self.views);
            metrics.set_cache_stats(&self.likes);
        }

        let views = self.persist(CounterKind::View, view_counts).await;
        let likes = self.persist(CounterKind::Like, like_counts).await;

        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let report = CycleReport {
            cycle,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            views,
            likes,
        };

        if report.is_clean() {
            info!(
                cycle,
                views = report.views.persisted,
                likes = report.likes.persisted,
                duration_ms = report.duration_ms,
                "Reconciliation cycle completed"
            );
        } else {
            warn!(
                cycle,
                persisted = report.persisted(),
                failed = report.failed(),
                duration_ms = report.duration_ms,
                "Reconciliation cycle completed with failures, retrying next cycle"
            );
        }

        *self.last_report.write() = Some(report.clone());

        let outcome = CycleOutcome::Completed(report);
        if let Some(metrics) = &self.metrics {
            metrics.observe(&outcome);
        }
        outcome
    }

    async fn persist(&self, kind: CounterKind, counts: HashMap<PostId, i64>) -> FlushSummary {
        if counts.is_empty() {
            debug!(%kind, "No cached counts to persist");
            return FlushSummary::empty(kind);
        }

        let attempted = counts.len();
        let result = timeout(
            self.config.persist_timeout,
            self.store.bulk_persist(kind, &counts),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::PersistTimeout {
                kind,
                timeout: self.config.persist_timeout,
            })
        });

        match result {
            Ok(()) => {
                info!(%kind, persisted = attempted, "Persisted cached counts");
                FlushSummary::complete(kind, attempted)
            }
            Err(e) => {
                let failed = match e.failed_posts() {
                    Some(posts) => posts.to_vec(),
                    None => {
                        let mut all: Vec<PostId> = counts.keys().copied().collect();
                        all.sort();
                        all
                    }
                };
                error!(
                    %kind,
                    attempted,
                    failed = failed.len(),
                    error = %e,
                    "Failed to persist cached counts"
                );
                FlushSummary::failed(kind, attempted, failed, e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("cycles", &self.cycles_completed())
            .field("in_flight", &self.is_running_cycle())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryCountStore;
    use crate::domain::{LikeAction, PostCounts};
    use assert_matches::assert_matches;

    fn setup(config: ReconcilerConfig) -> (Arc<InMemoryCountStore>, PostCounters, Arc<Reconciler>) {
        let store = Arc::new(InMemoryCountStore::with_rows([
            (PostId(1), PostCounts::default()),
            (PostId(2), PostCounts::default()),
        ]));
        let counters = PostCounters::new(store.clone());
        let reconciler = Reconciler::new(config, &counters, store.clone()).unwrap();
        (store, counters, Arc::new(reconciler))
    }

    #[test]
    fn test_config_validation() {
        assert!(ReconcilerConfig::default().validate().is_ok());

        let config = ReconcilerConfig {
            interval: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let config = ReconcilerConfig {
            persist_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_empty_caches_skip_store() {
        let (store, _counters, reconciler) = setup(ReconcilerConfig::default());

        let outcome = reconciler.run_cycle().await;

        let report = outcome.report().unwrap();
        assert_eq!(report.cycle, 1);
        assert_eq!(report.attempted(), 0);
        assert!(report.is_clean());
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_persists_and_keeps_entries() {
        let (store, counters, reconciler) = setup(ReconcilerConfig::default());
        counters.resync(PostId(1), PostCounts::new(8, 2));
        counters.views().force_put(PostId(2), 3);

        let outcome = reconciler.run_cycle().await;
        let report = outcome.report().unwrap();

        assert!(report.is_clean());
        assert_eq!(report.views.persisted, 2);
        assert_eq!(report.likes.persisted, 1);
        assert_eq!(store.row(PostId(1)), Some(PostCounts::new(8, 2)));
        assert_eq!(store.value(CounterKind::View, PostId(2)), Some(3));

        assert_eq!(counters.views().len(), 2);
        assert_eq!(counters.likes().len(), 1);
        assert_eq!(reconciler.last_report().as_ref(), Some(report));
    }

    #[tokio::test]
    async fn test_partial_failure_is_retried_next_cycle() {
        let (store, counters, reconciler) = setup(ReconcilerConfig::default());
        counters.views().force_put(PostId(1), 8);
        counters.views().force_put(PostId(2), 3);
        counters.apply_like(PostId(1), LikeAction::Like).await;
        store.fail_writes_for(PostId(2));

        let first = reconciler.run_cycle().await;
        let report = first.report().unwrap();
        assert_eq!(report.views.failed, vec![PostId(2)]);
        assert_eq!(report.views.persisted, 1);
        assert!(report.likes.is_clean());
        assert_eq!(store.value(CounterKind::View, PostId(1)), Some(8));
        assert_eq!(store.value(CounterKind::View, PostId(2)), Some(0));

        counters.record_view(PostId(2)).await;
        store.heal(PostId(2));

        let second = reconciler.run_cycle().await;
        assert!(second.report().unwrap().is_clean());
        assert_eq!(store.value(CounterKind::View, PostId(2)), Some(4));
        assert_eq!(reconciler.cycles_completed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_persist_times_out_and_continues() {
        let (store, counters, reconciler) = setup(ReconcilerConfig {
            persist_timeout: Duration::from_secs(1),
            ..Default::default()
        });
        counters.views().force_put(PostId(1), 5);
        counters.views().force_put(PostId(2), 6);
        store.set_bulk_delay(Duration::from_secs(10));

        let outcome = reconciler.run_cycle().await;
        let report = outcome.report().unwrap();

        assert_eq!(report.views.failed, vec![PostId(1), PostId(2)]);
        assert_eq!(report.views.persisted, 0);
        assert!(report.views.error.as_deref().unwrap().contains("timed out"));
        assert!(!reconciler.is_running_cycle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_cycle_is_skipped() {
        let (store, counters, reconciler) = setup(ReconcilerConfig::default());
        counters.views().force_put(PostId(1), 1);
        store.set_bulk_delay(Duration::from_secs(5));

        let slow = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.run_cycle().await })
        };
        while !reconciler.is_running_cycle() {
            tokio::task::yield_now().await;
        }

        assert_eq!(reconciler.run_cycle().await, CycleOutcome::Skipped);

        assert_matches!(slow.await.unwrap(), CycleOutcome::Completed(_));
        assert!(!reconciler.is_running_cycle());
        assert_eq!(reconciler.cycles_completed(), 1);
        assert_eq!(store.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_ticks_and_flushes_on_shutdown() {
        let (store, counters, reconciler) = setup(ReconcilerConfig {
            interval: Duration::from_secs(60),
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(reconciler.clone().run(shutdown.clone()));

        counters.record_view(PostId(1)).await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(reconciler.cycles_completed(), 1);
        assert_eq!(store.value(CounterKind::View, PostId(1)), Some(1));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(reconciler.cycles_completed(), 2);

        counters.record_view(PostId(1)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(reconciler.cycles_completed(), 3);
        assert_eq!(store.value(CounterKind::View, PostId(1)), Some(2));
    }

    #[tokio::test]
    async fn test_metrics_follow_cycles() {
        let store = Arc::new(InMemoryCountStore::with_rows([(PostId(1), PostCounts::default())]));
        let counters = PostCounters::new(store.clone());
        let metrics = ReconcileMetrics::new().unwrap();
        let reconciler = Reconciler::new(ReconcilerConfig::default(), &counters, store.clone())
            .unwrap()
            .with_metrics(metrics.clone());

        counters.resync(PostId(1), PostCounts::new(3, 1));
        store.fail_writes_for(PostId(1));
        reconciler.run_cycle().await;

        assert_eq!(metrics.cycles("partial"), 1);
        assert_eq!(metrics.failed(CounterKind::View), 1);
        assert_eq!(metrics.failed(CounterKind::Like), 1);

        store.heal(PostId(1));
        reconciler.run_cycle().await;

        assert_eq!(metrics.cycles("completed"), 1);
        assert_eq!(metrics.persisted(CounterKind::View), 1);
    }
}
