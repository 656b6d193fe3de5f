//! Configuration loading.
//!
//! The config file is TOML, located via the `--config` CLI flag. Every key
//! except `proxy.upstream_url` has a default, so a minimal file is just the
//! upstream URL. A missing or malformed file is a startup error; the process
//! refuses to run on a config it cannot fully parse.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {detail}")]
    Parse { path: PathBuf, detail: String },
    #[error("invalid upstream URL: {0}")]
    InvalidUpstream(String),
    #[error("invalid listen address '{0}'")]
    InvalidListenAddr(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct SystemConfig {
    /// Inbound bind address. A bare `":port"` binds all interfaces.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Tokio worker threads. Defaults to the machine's available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Full URL of the upstream origin: scheme, authority, optional base path.
    pub upstream_url: String,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns_per_host: usize,
    #[serde(default = "default_idle_conn_timeout")]
    pub idle_conn_timeout_seconds: u64,
    /// Forward the client's `Host` header instead of the upstream authority.
    #[serde(default)]
    pub preserve_original_host: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// TTL for responses that carry no freshness hints. Zero disables expiry
    /// for those entries.
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_seconds: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            capacity: default_cache_capacity(),
            default_ttl_seconds: default_cache_ttl(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

fn default_listen_addr() -> String {
    ":8000".to_string()
}

fn default_max_idle_conns() -> usize {
    100
}

fn default_idle_conn_timeout() -> u64 {
    10
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    100
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    60
}

impl SystemConfig {
    /// Resolves `listen_addr` to a socket address, normalising the bare
    /// `":8000"` shorthand to all interfaces.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = if self.listen_addr.starts_with(':') {
            format!("0.0.0.0{}", self.listen_addr)
        } else {
            self.listen_addr.clone()
        };
        addr.parse()
            .map_err(|_| ConfigError::InvalidListenAddr(self.listen_addr.clone()))
    }
}

impl ProxyConfig {
    pub fn idle_conn_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_conn_timeout_seconds)
    }
}

/// Reads and parses the config file.
pub fn load_config(path: &Path) -> Result<SystemConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: SystemConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    tracing::info!(path = %path.display(), "configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: SystemConfig = toml::from_str(
            r#"
            [proxy]
            upstream_url = "http://localhost:9000/api"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.listen_addr, ":8000");
        assert_eq!(cfg.proxy.max_idle_conns, 100);
        assert_eq!(cfg.proxy.max_idle_conns_per_host, 100);
        assert_eq!(cfg.proxy.idle_conn_timeout(), Duration::from_secs(10));
        assert!(!cfg.proxy.preserve_original_host);
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.capacity, 100);
        assert_eq!(cfg.cache.default_ttl_seconds, 60);
        assert_eq!(cfg.cache.cleanup_interval_seconds, 60);
    }

    #[test]
    fn full_config_overrides_defaults() {
        let cfg: SystemConfig = toml::from_str(
            r#"
            listen_addr = "127.0.0.1:8080"
            workers = 2

            [proxy]
            upstream_url = "https://origin.internal"
            max_idle_conns = 10
            max_idle_conns_per_host = 4
            idle_conn_timeout_seconds = 30
            preserve_original_host = true

            [cache]
            enabled = false
            capacity = 5000
            default_ttl_seconds = 300
            cleanup_interval_seconds = 15
            "#,
        )
        .unwrap();

        assert_eq!(cfg.workers, Some(2));
        assert_eq!(cfg.proxy.max_idle_conns_per_host, 4);
        assert!(cfg.proxy.preserve_original_host);
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.cache.capacity, 5000);
    }

    #[test]
    fn missing_upstream_url_is_a_parse_error() {
        let result = toml::from_str::<SystemConfig>("[proxy]\n");
        assert!(result.is_err());
    }

    #[test]
    fn bare_port_listen_addr_binds_all_interfaces() {
        let cfg: SystemConfig = toml::from_str(
            r#"
            [proxy]
            upstream_url = "http://localhost:9000"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bind_addr().unwrap(), "0.0.0.0:8000".parse().unwrap());
    }

    #[test]
    fn invalid_listen_addr_is_rejected() {
        let cfg: SystemConfig = toml::from_str(
            r#"
            listen_addr = "not-an-address"
            [proxy]
            upstream_url = "http://localhost:9000"
            "#,
        )
        .unwrap();
        assert!(matches!(
            cfg.bind_addr(),
            Err(ConfigError::InvalidListenAddr(_))
        ));
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
