use std::process::ExitCode;
use std::sync::Arc;

use heimdall_proxy::aggregation::AggregationScheduler;
use heimdall_proxy::cache::ResponseCache;
use heimdall_proxy::config::Config;
use heimdall_proxy::http_api;
use heimdall_proxy::logstore::{InMemoryLogSink, LogSink};
use heimdall_proxy::mapping::MappingStore;
use heimdall_proxy::metrics::ProxyMetrics;
use heimdall_proxy::pipeline::{self, Pipeline};
use heimdall_proxy::server::run_udp_server;
use heimdall_proxy::upstream::{HealthState, UpstreamManager};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(10);
const CACHE_CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
const RETENTION_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration, exiting");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = run(config).await {
        error!(error = %err, "unrecoverable error, exiting");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run(config: Config) -> std::io::Result<()> {
    let metrics = Arc::new(ProxyMetrics::new().expect("metric registration cannot fail with static names"));
    let cache = Arc::new(ResponseCache::new(config.cache_size, config.cache_ttl_cap));
    let mapping = Arc::new(MappingStore::new());
    if let Some(seed_path) = &config.mapping_seed_file {
        match mapping.load_seed_file(seed_path) {
            Ok(count) => info!(count, "loaded custom-mapping seed file"),
            Err(err) => warn!(error = %err, "failed to load custom-mapping seed file"),
        }
    }

    let upstream = Arc::new(UpstreamManager::new(
        config.upstreams.clone(),
        config.upstream_timeout,
        config.unhealthy_threshold,
        config.retry_attempts,
    ));

    let sink: Arc<dyn LogSink> = Arc::new(InMemoryLogSink::new());

    let (pipeline, log_rx) = Pipeline::new(
        cache.clone(),
        mapping.clone(),
        upstream.clone(),
        metrics.clone(),
        config.max_concurrent,
        config.custom_mapping_ttl,
    );
    let pipeline = Arc::new(pipeline);

    let (shutdown_tx, _) = broadcast::channel(4);

    let log_consumer = tokio::spawn(pipeline::run_log_consumer(log_rx, sink.clone(), metrics.clone()));

    let scheduler = Arc::new(AggregationScheduler::new(
        sink.clone(),
        config.aggregation_interval,
        env!("CARGO_PKG_VERSION").to_string(),
    ));
    let aggregation_task = tokio::spawn({
        let scheduler = scheduler.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        async move { scheduler.run(shutdown_rx).await }
    });

    // Background tasks (spec §5): cache cleanup ticker and log-sink
    // retention sweep, alongside the aggregation scheduler above.
    let cache_cleanup_task = tokio::spawn({
        let cache = cache.clone();
        let upstream = upstream.clone();
        let metrics = metrics.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        async move {
            let mut ticker = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.cleanup();
                        metrics.cache_size.set(cache.len() as i64);
                        let unhealthy = upstream
                            .health_snapshot()
                            .iter()
                            .filter(|(_, state, _)| *state == HealthState::Unhealthy)
                            .count();
                        metrics.upstream_unhealthy.set(unhealthy as i64);
                    }
                    _ = shutdown_rx.recv() => {
                        info!("cache cleanup ticker shutting down");
                        return;
                    }
                }
            }
        }
    });

    let retention_task = tokio::spawn({
        let sink = sink.clone();
        let retention_days = config.log_retention_days;
        let mut shutdown_rx = shutdown_tx.subscribe();
        async move {
            let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);
                        let purged = sink.purge(cutoff).await;
                        if purged > 0 {
                            info!(purged, "log retention sweep purged expired records");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("log retention sweep shutting down");
                        return;
                    }
                }
            }
        }
    });

    let http_task = config.http_bind_addr.map(|http_bind_addr| {
        let router = http_api::router(mapping.clone(), metrics.clone(), sink.clone());
        tokio::spawn(async move {
            if let Err(err) = http_api::serve(http_bind_addr, router).await {
                error!(error = %err, "HTTP API adapter exited with error");
            }
        })
    });

    let udp_shutdown_rx = shutdown_tx.subscribe();
    let udp_server = tokio::spawn(run_udp_server(config.listen_addr, pipeline, udp_shutdown_rx));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    // Graceful shutdown order (spec §5): UDP listener, then aggregation
    // scheduler, then the log sink, bounded by a grace window.
    let _ = shutdown_tx.send(());

    if tokio::time::timeout(SHUTDOWN_GRACE, udp_server).await.is_err() {
        warn!("UDP server did not stop within the grace window");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, aggregation_task).await.is_err() {
        warn!("aggregation scheduler did not stop within the grace window");
    }
    cache_cleanup_task.abort();
    retention_task.abort();

    // The in-process log sink has no connection pool to close; a real
    // storage backend would be closed here (spec §5 step v).
    log_consumer.abort();

    if let Some(http_task) = http_task {
        http_task.abort();
    }

    info!("graceful shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
