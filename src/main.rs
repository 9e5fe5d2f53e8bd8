//! mempool-tracker binary.
//!
//! Wires the adapters around the pools: JSON-RPC client towards the upstream
//! node, event publisher, Prometheus-backed pool metrics with a health/metrics
//! HTTP listener, and the polling driver. Stops cleanly on ctrl-c.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use clap::Parser;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mempool_tracker::{
    config::PublishCfg,
    poll,
    publish::{BroadcastPublisher, Publisher, TopicPair},
    rpc::{HttpRpc, MempoolSource, NonceSource},
    telemetry,
    txpool::{PendingPool, PoolMetrics, QueuedPool},
    Config,
};

#[derive(Debug, Parser)]
#[command(name = "mempool-tracker", version, about = "Tracks a remote node's mempool")]
struct Cli {
    /// Path to a TOML config file; environment variables override it.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the log filter (e.g. "info,mempool_tracker=debug").
    #[arg(long)]
    log_filter: Option<String>,

    /// Override the health/metrics bind address.
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Log as human-readable text instead of JSON.
    #[arg(long, default_value_t = false)]
    text_logs: bool,
}

/// Prometheus-backed recorder for one pool.
struct PromPoolMetrics {
    added: IntCounter,
    removed: IntCounter,
    size: IntGauge,
    pruned: IntCounter,
}

impl PromPoolMetrics {
    fn register(registry: &Registry, pool: &str) -> Result<Arc<Self>> {
        let added = IntCounter::with_opts(Opts::new(
            format!("mempool_tracker_{pool}_added_total"),
            format!("Transactions admitted into the {pool} pool"),
        ))?;
        let removed = IntCounter::with_opts(Opts::new(
            format!("mempool_tracker_{pool}_removed_total"),
            format!("Transactions removed from the {pool} pool"),
        ))?;
        let size = IntGauge::with_opts(Opts::new(
            format!("mempool_tracker_{pool}_size"),
            format!("Current size of the {pool} pool"),
        ))?;
        let pruned = IntCounter::with_opts(Opts::new(
            format!("mempool_tracker_{pool}_pruned_total"),
            format!("Transactions promoted out of the {pool} pool by prunes"),
        ))?;
        for collector in [&added, &removed, &pruned] {
            registry.register(Box::new(collector.clone()))?;
        }
        registry.register(Box::new(size.clone()))?;
        Ok(Arc::new(Self {
            added,
            removed,
            size,
            pruned,
        }))
    }
}

impl PoolMetrics for PromPoolMetrics {
    fn on_added(&self, pool_size: usize) {
        self.added.inc();
        self.size.set(pool_size as i64);
    }

    fn on_removed(&self, pool_size: usize) {
        self.removed.inc();
        self.size.set(pool_size as i64);
    }

    fn on_prune_finished(&self, _scanned: usize, removed: u64) {
        self.pruned.inc_by(removed);
    }
}

#[derive(Clone)]
struct HttpState {
    registry: Registry,
    cancel: CancellationToken,
}

async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    if state.cancel.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    } else {
        (StatusCode::OK, "ok")
    }
}

async fn metrics(State(state): State<HttpState>) -> Response {
    let families = state.registry.gather();
    let mut body = Vec::new();
    match TextEncoder::new().encode(&families, &mut body) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(feature = "kafka")]
fn build_publisher(
    publish_cfg: &PublishCfg,
    fallback: &Arc<BroadcastPublisher>,
) -> Result<Arc<dyn Publisher>> {
    use mempool_tracker::publish::kafka::KafkaPublisher;

    match publish_cfg.kafka_brokers.as_deref() {
        Some(brokers) => {
            info!(brokers, "publishing pool events to kafka");
            Ok(Arc::new(KafkaPublisher::new(
                brokers,
                std::time::Duration::from_secs(5),
            )?))
        }
        None => Ok(Arc::clone(fallback) as Arc<dyn Publisher>),
    }
}

#[cfg(not(feature = "kafka"))]
fn build_publisher(
    publish_cfg: &PublishCfg,
    fallback: &Arc<BroadcastPublisher>,
) -> Result<Arc<dyn Publisher>> {
    if publish_cfg.kafka_brokers.is_some() {
        warn!("publish.kafka_brokers is set but this binary was built without the kafka feature");
    }
    Ok(Arc::clone(fallback) as Arc<dyn Publisher>)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("load configuration")?;
    if let Some(filter) = cli.log_filter {
        config.telemetry.log_filter = filter;
    }
    if let Some(addr) = cli.metrics_addr {
        config.server.bind = addr;
    }
    if cli.text_logs {
        config.telemetry.json = false;
    }
    config.validate().context("validate configuration")?;

    telemetry::init(&config.telemetry.log_filter, config.telemetry.json)?;
    info!(rpc_url = %config.node.rpc_url, period = ?config.poll.period, "starting mempool tracker");

    let cancel = CancellationToken::new();

    // health + metrics listener
    let registry = Registry::new();
    let http_state = HttpState {
        registry: registry.clone(),
        cancel: cancel.clone(),
    };
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(http_state);
    let server_addr = config.server_addr()?;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("bind {server_addr}"))?;
    info!(%server_addr, "health/metrics listener up");
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        let shutdown = server_cancel.cancelled_owned();
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %err, "health/metrics listener failed");
        }
    });

    // upstream node adapter
    let rpc = HttpRpc::new(config.rpc_url()?, config.node.request_timeout)?;
    let nonce_source: Arc<dyn NonceSource> = Arc::new(rpc.clone());
    let mempool_source: Arc<dyn MempoolSource> = Arc::new(rpc);

    // event publishing, with a local subscriber surfacing events in the logs
    let broadcast = Arc::new(BroadcastPublisher::new(config.publish.capacity));
    let publisher = build_publisher(&config.publish, &broadcast)?;
    let mut events = broadcast.subscribe();
    let _event_drain = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(msg) => debug!(topic = %msg.topic, bytes = msg.payload.len(), "pool event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagging")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // pools
    let pending = PendingPool::new(
        TopicPair {
            entry: config.publish.pending_entry_topic.clone(),
            exit: config.publish.pending_exit_topic.clone(),
        },
        Arc::clone(&publisher),
        PromPoolMetrics::register(&registry, "pending")?,
    );
    let queued = QueuedPool::new(
        TopicPair {
            entry: config.publish.queued_entry_topic.clone(),
            exit: config.publish.queued_exit_topic.clone(),
        },
        config.poll.concurrency,
        nonce_source,
        publisher,
        Arc::clone(&pending),
        PromPoolMetrics::register(&registry, "queued")?,
        cancel.clone(),
    );

    // polling driver
    let poller = tokio::spawn(poll::run(
        mempool_source,
        queued,
        pending,
        config.poll.period,
        cancel.clone(),
    ));

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    warn!("shutdown signal received");
    cancel.cancel();

    let _ = poller.await;
    let _ = server.await;
    info!("mempool tracker stopped");
    Ok(())
}
