//! Board Counters daemon
//!
//! Runs the counter caches and their reconciler, exposing Prometheus metrics
//! and health probes over HTTP.
//!
//! The daemon is backed by the in-memory store. `--preload-posts N` creates
//! rows for posts `1..=N` and registers them with the caches, so each cycle
//! flushes their counters; request handlers embedding the library drive the
//! caches through [`PostCounters`] instead.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        board-counters                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │ PostCounters │───▶│  Reconciler  │───▶│  CountStore  │       │
//! │  │ (view/like)  │    │  (interval)  │    │  (durable)   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │         /metrics (Prometheus)      /healthz /readyz             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use board_counters::monitoring::{HealthResponse, ReconcileMetrics};
use board_counters::{
    Error, InMemoryCountStore, PostCounts, PostCounters, PostId, Reconciler, ReconcilerConfig,
    Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Write-back view/like counter cache with periodic reconciliation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seconds between reconciliation cycles
    #[arg(long, env = "RECONCILE_INTERVAL_SECONDS", default_value = "60")]
    reconcile_interval_secs: u64,

    /// Upper bound in seconds on each metric's bulk write
    #[arg(long, env = "PERSIST_TIMEOUT_SECONDS", default_value = "30")]
    persist_timeout_secs: u64,

    /// Skip the final flush on shutdown
    #[arg(long, env = "NO_FLUSH_ON_SHUTDOWN")]
    no_flush_on_shutdown: bool,

    /// Number of posts (ids 1..=N) to create in the store and register in the caches
    #[arg(long, env = "PRELOAD_POSTS", default_value = "0")]
    preload_posts: i64,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval: Duration::from_secs(self.reconcile_interval_secs),
            persist_timeout: Duration::from_secs(self.persist_timeout_secs),
            flush_on_shutdown: !self.no_flush_on_shutdown,
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting board counters");
    info!("  Reconcile interval: {}s", args.reconcile_interval_secs);
    info!("  Persist timeout: {}s", args.persist_timeout_secs);
    info!("  Flush on shutdown: {}", !args.no_flush_on_shutdown);

    let store = Arc::new(InMemoryCountStore::new());
    let counters = PostCounters::new(store.clone());
    preload_posts(&store, &counters, args.preload_posts);
    info!(
        "In-memory count store ready with {} registered posts",
        counters.views().len()
    );

    let metrics = ReconcileMetrics::new()?;
    let reconciler = Arc::new(
        Reconciler::new(args.reconciler_config(), &counters, store)?.with_metrics(metrics.clone()),
    );

    let shutdown = CancellationToken::new();
    let reconcile_handle = tokio::spawn(reconciler.clone().run(shutdown.clone()));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_reconciler = reconciler.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_reconciler).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    reconcile_handle
        .await
        .map_err(|e| Error::Internal(format!("Reconciler task failed: {}", e)))?;

    info!("Board counters shutdown complete");
    Ok(())
}

/// Create rows for posts `1..=count` and start their counters at zero
fn preload_posts(store: &InMemoryCountStore, counters: &PostCounters, count: i64) {
    for id in 1..=count {
        store.insert_row(PostId(id), PostCounts::default());
        counters.register_post(PostId(id));
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP helpers
// =============================================================================

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

async fn bind(addr: &str, name: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} server address: {}", name, e)))?;

    let listener = TcpListener::bind(addr).await?;

    info!("{} server listening on {}", name, addr);
    Ok(listener)
}

// =============================================================================
// Health Server
// =============================================================================

async fn health_handler(
    req: Request<hyper::body::Incoming>,
    reconciler: Arc<Reconciler>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" | "/livez" => respond(StatusCode::OK, "text/plain", "ok"),
        "/readyz" => {
            let health = HealthResponse::from_reconciler(&reconciler);
            let status = if health.status.is_operational() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            match serde_json::to_vec(&health) {
                Ok(body) => respond(status, "application/json", body),
                Err(e) => respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    e.to_string(),
                ),
            }
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    };
    Ok(response)
}

async fn run_health_server(addr: &str, reconciler: Arc<Reconciler>) -> Result<()> {
    let listener = bind(addr, "Health").await?;

    loop {
        let (stream, _) = listener.accept().await?;

        let io = TokioIo::new(stream);
        let reconciler = reconciler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| health_handler(req, reconciler.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn metrics_handler(
    req: Request<hyper::body::Incoming>,
    metrics: ReconcileMetrics,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => match metrics.encode() {
            Ok((content_type, body)) => respond(StatusCode::OK, &content_type, body),
            Err(e) => respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                e.to_string(),
            ),
        },
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    };
    Ok(response)
}

async fn run_metrics_server(addr: &str, metrics: ReconcileMetrics) -> Result<()> {
    let listener = bind(addr, "Metrics").await?;

    loop {
        let (stream, _) = listener.accept().await?;

        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| metrics_handler(req, metrics.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use board_counters::CounterKind;

    #[tokio::test]
    async fn test_preloaded_posts_are_flushed() {
        let store = Arc::new(InMemoryCountStore::new());
        let counters = PostCounters::new(store.clone());
        preload_posts(&store, &counters, 3);

        assert_eq!(counters.views().len(), 3);
        assert_eq!(store.stats().row_count, 3);

        let reconciler =
            Reconciler::new(ReconcilerConfig::default(), &counters, store.clone()).unwrap();
        counters.record_view(PostId(2)).await;
        reconciler.run_cycle().await;

        assert_eq!(store.batches_for(CounterKind::View)[0].counts.len(), 3);
        assert_eq!(store.value(CounterKind::View, PostId(2)), Some(1));
        assert_eq!(store.stats().seeds, 0);
    }

    #[tokio::test]
    async fn test_bind_errors_keep_their_kind() {
        assert_matches!(bind("not-an-address", "Health").await, Err(Error::Config(_)));

        let taken = bind("127.0.0.1:0", "Health").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        assert_matches!(bind(&addr, "Metrics").await, Err(Error::Io(_)));
    }
}
