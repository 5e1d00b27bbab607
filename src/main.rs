//! bucketcache - memcached-compatible UDP cache server
//!
//! Serves GET and SET over the memcached ASCII and binary protocols, storing
//! items in a slab-style bucket allocator behind a sharded index.

// Use jemalloc for better multi-threaded performance (10-30% throughput improvement)
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use bucketcache::config::Config;
use bucketcache::metrics::Metrics;
use bucketcache::server::Server;
use bucketcache::storage::Cache;
use std::sync::Arc;
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting bucketcache");

    // Load configuration
    let config = if let Some(config_path) = std::env::args().nth(1) {
        info!("Loading configuration from {}", config_path);
        Config::from_file(&config_path)?
    } else {
        info!("Using default configuration (set BUCKETCACHE_* env vars to customize)");
        Config::from_env()?
    };

    info!("Configuration: {:?}", config);

    // Reserve the first page of every class before accepting traffic
    let cache = Arc::new(
        Cache::new(&config.cache)
            .map_err(|e| anyhow::anyhow!("Failed to initialise bucket allocator: {e}"))?,
    );

    let runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async_main(config, cache))
}

async fn async_main(config: Config, cache: Arc<Cache>) -> anyhow::Result<()> {
    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    let metrics = Arc::new(Metrics::new());
    metrics.observe_allocator(cache.allocator());

    let server = Server::bind(
        config.server.clone(),
        Arc::clone(&cache),
        Arc::clone(&metrics),
        cancel_token.clone(),
    )
    .await?;

    // Setup signal handlers
    let cancel_for_signal = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
            }
            _ = async {
                #[cfg(unix)]
                {
                    use tokio::signal::unix::{signal, SignalKind};
                    match signal(SignalKind::terminate()) {
                        Ok(mut sigterm) => sigterm.recv().await,
                        Err(e) => {
                            error!("Failed to install SIGTERM handler: {}", e);
                            std::future::pending::<Option<()>>().await
                        }
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<Option<()>>().await
                }
            } => {
                info!("Received SIGTERM, shutting down...");
            }
        }
        cancel_for_signal.cancel();
    });

    // Run the main server
    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
    }

    metrics.observe_allocator(cache.allocator());
    info!(
        gets = metrics.cmd_get.get(),
        hits = metrics.get_hits.get(),
        sets = metrics.cmd_set.get(),
        not_stored = metrics.set_not_stored.get(),
        dropped = metrics.datagrams_dropped.get(),
        pages = metrics.pages_assigned.get(),
        entries = cache.index().len(),
        "Final statistics"
    );
    debug!("Metrics snapshot:\n{}", metrics.gather());

    cache.shutdown();
    info!("bucketcache stopped");
    Ok(())
}
