use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use palisade::cache::CacheBuilder;
use palisade::client::UpstreamClient;
use palisade::config::{self, ConfigError};
use palisade::proxy::{self, ProxyContext, ResponseCache};
use palisade::telemetry;

#[derive(Parser, Debug)]
#[command(author, version, about = "Caching HTTP/1.1 reverse proxy")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

/// Plain `main` instead of `#[tokio::main]`: the config file decides how many
/// worker threads the runtime gets, so it has to be read before the runtime
/// is built. Any `Err` out of here exits the process non-zero.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_telemetry();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let bind_addr = cfg.bind_addr()?;
    let upstream = proxy::rewrite::UpstreamTarget::parse(&cfg.proxy.upstream_url)
        .map_err(ConfigError::InvalidUpstream)?;

    let workers = cfg.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });
    tracing::info!(workers, config = %cli.config.display(), "starting palisade");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?;

    rt.block_on(async {
        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        });

        let client = UpstreamClient::new(
            cfg.proxy.max_idle_conns,
            cfg.proxy.max_idle_conns_per_host,
            cfg.proxy.idle_conn_timeout(),
        )?;

        let cache: Option<ResponseCache> = if cfg.cache.enabled {
            let cache = CacheBuilder::new(cfg.cache.capacity)
                .default_ttl(Duration::from_secs(cfg.cache.default_ttl_seconds))
                .cleanup_interval(Duration::from_secs(cfg.cache.cleanup_interval_seconds))
                .build()?;
            tracing::info!(
                capacity = cfg.cache.capacity,
                default_ttl_seconds = cfg.cache.default_ttl_seconds,
                "response cache enabled"
            );
            Some(cache)
        } else {
            tracing::info!("response cache disabled");
            None
        };

        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| format!("failed to bind {bind_addr}: {e}"))?;
        telemetry::log_ready(&bind_addr, &cfg.proxy.upstream_url, cfg.cache.enabled);

        let ctx = Arc::new(ProxyContext {
            upstream,
            client,
            cache,
            preserve_original_host: cfg.proxy.preserve_original_host,
        });
        proxy::run_server(listener, ctx, shutdown).await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}

/// Resolves when the process is asked to stop: Ctrl-C everywhere, SIGTERM on
/// unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("received Ctrl-C"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
    }
}
