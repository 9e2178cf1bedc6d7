//! Prometheus Metrics
//!
//! Reconciliation, cache-size and cache hit/miss metrics on a private
//! registry, rendered in the Prometheus text format by the binary's
//! `/metrics` endpoint.

use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::cache::CounterCache;
use crate::domain::CounterKind;
use crate::error::Result;
use crate::reconcile::{CycleOutcome, CycleReport};

const NAMESPACE: &str = "board_counters";

/// Metrics recorded by the reconciler
#[derive(Clone)]
pub struct ReconcileMetrics {
    registry: Registry,
    cycles: IntCounterVec,
    persisted: IntCounterVec,
    failed: IntCounterVec,
    cycle_duration: Histogram,
    cached_entries: IntGaugeVec,
    cache_hits: IntGaugeVec,
    cache_misses: IntGaugeVec,
    seed_failures: IntGaugeVec,
    cache_hit_ratio: GaugeVec,
}

impl ReconcileMetrics {
    /// Create and register every metric on a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cycles = IntCounterVec::new(
            Opts::new("reconcile_cycles_total", "Reconciliation cycles by outcome")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;
        let persisted = IntCounterVec::new(
            Opts::new("persisted_counts_total", "Counter values written to durable storage")
                .namespace(NAMESPACE),
            &["metric"],
        )?;
        let failed = IntCounterVec::new(
            Opts::new("persist_failures_total", "Counter values that failed to persist")
                .namespace(NAMESPACE),
            &["metric"],
        )?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "reconcile_cycle_duration_seconds",
                "Wall time of one reconciliation cycle",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        let cached_entries = IntGaugeVec::new(
            Opts::new("cached_entries", "Posts held in each counter cache").namespace(NAMESPACE),
            &["metric"],
        )?;

        let cache_hits = IntGaugeVec::new(
            Opts::new("cache_hits", "Cache lookups served from memory").namespace(NAMESPACE),
            &["metric"],
        )?;
        let cache_misses = IntGaugeVec::new(
            Opts::new("cache_misses", "Cache lookups that read the store").namespace(NAMESPACE),
            &["metric"],
        )?;
        let seed_failures = IntGaugeVec::new(
            Opts::new("seed_failures", "Store reads that failed on a cache miss")
                .namespace(NAMESPACE),
            &["metric"],
        )?;
        let cache_hit_ratio = GaugeVec::new(
            Opts::new("cache_hit_ratio", "Hits over lookups since start").namespace(NAMESPACE),
            &["metric"],
        )?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(persisted.clone()))?;
        registry.register(Box::new(failed.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;
        registry.register(Box::new(cached_entries.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(seed_failures.clone()))?;
        registry.register(Box::new(cache_hit_ratio.clone()))?;

        Ok(Self {
            registry,
            cycles,
            persisted,
            failed,
            cycle_duration,
            cached_entries,
            cache_hits,
            cache_misses,
            seed_failures,
            cache_hit_ratio,
        })
    }

    /// Record the outcome of one `run_cycle` call
    pub fn observe(&self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Skipped => self.cycles.with_label_values(&["skipped"]).inc(),
            CycleOutcome::Completed(report) => self.observe_report(report),
        }
    }

    fn observe_report(&self, report: &CycleReport) {
        let outcome = if report.is_clean() { "completed" } else { "partial" };
        self.cycles.with_label_values(&[outcome]).inc();
        self.cycle_duration
            .observe(report.duration_ms as f64 / 1000.0);

        for summary in [&report.views, &report.likes] {
            let metric = summary.kind.as_str();
            self.persisted
                .with_label_values(&[metric])
                .inc_by(summary.persisted as u64);
            self.failed
                .with_label_values(&[metric])
                .inc_by(summary.failed.len() as u64);
        }
    }

    /// Record the current size of one cache
    pub fn set_cached_entries(&self, kind: CounterKind, entries: usize) {
        self.cached_entries
            .with_label_values(&[kind.as_str()])
            .set(entries as i64);
    }

    /// Publish the foreground statistics of one cache
    pub fn set_cache_stats(&self, cache: &CounterCache) {
        let metric = cache.kind().as_str();
        let stats = cache.stats();
        self.cache_hits
            .with_label_values(&[metric])
            .set(stats.hits() as i64);
        self.cache_misses
            .with_label_values(&[metric])
            .set(stats.misses() as i64);
        self.seed_failures
            .with_label_values(&[metric])
            .set(stats.seed_failures() as i64);
        self.cache_hit_ratio
            .with_label_values(&[metric])
            .set(stats.hit_ratio());
    }

    pub fn cycles(&self, outcome: &str) -> u64 {
        self.cycles.with_label_values(&[outcome]).get()
    }

    pub fn persisted(&self, kind: CounterKind) -> u64 {
        self.persisted.with_label_values(&[kind.as_str()]).get()
    }

    pub fn failed(&self, kind: CounterKind) -> u64 {
        self.failed.with_label_values(&[kind.as_str()]).get()
    }

    pub fn seed_failures(&self, kind: CounterKind) -> i64 {
        self.seed_failures.with_label_values(&[kind.as_str()]).get()
    }

    pub fn hit_ratio(&self, kind: CounterKind) -> f64 {
        self.cache_hit_ratio.with_label_values(&[kind.as_str()]).get()
    }

    /// Render the registry in the text exposition format.
    ///
    /// Returns the content type and the encoded body.
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl std::fmt::Debug for ReconcileMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileMetrics").finish_non_exhaustive()
    }
}
