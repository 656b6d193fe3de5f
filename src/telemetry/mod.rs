//! Process-wide tracing setup.

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

/// Default verbosity when `RUST_LOG` is unset. The cache and the proxy
/// pipeline are the two subsystems worth watching in the field — hits,
/// misses, stores, sweeps and upstream forwards all log at debug there —
/// while everything else stays at info.
const DEFAULT_FILTER: &str = "palisade::cache=debug,palisade::proxy=debug,info";

pub fn init_telemetry() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// One readiness line once the listener is bound, carrying the fields an
/// operator checks first: where we listen, where we forward, and whether
/// responses are cached.
pub fn log_ready(listen: &SocketAddr, upstream: &str, cache_enabled: bool) {
    tracing::info!(%listen, upstream, cache_enabled, "reverse proxy ready");
}
