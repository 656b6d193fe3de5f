//! Outbound HTTP client for the upstream origin.
//!
//! Thin wrapper around [`reqwest::Client`] that applies the connection pool
//! bounds from the `[proxy]` configuration. Everything above this module
//! treats it as "send a prepared request, get a response or a transport
//! error"; pool behaviour is tuning, not semantics.

use std::time::Duration;

use bytes::Bytes;
use http::Request;

/// Total request deadline, matching the default the origin client has always
/// shipped with.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    /// Builds a client with the given idle-connection bounds.
    ///
    /// The pool is per-host and this proxy talks to exactly one upstream
    /// host, so the per-host cap doubles as the total cap; the stricter of
    /// the two configured limits wins.
    pub fn new(
        max_idle_conns: usize,
        max_idle_conns_per_host: usize,
        idle_conn_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(max_idle_conns.min(max_idle_conns_per_host))
            .pool_idle_timeout(idle_conn_timeout)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    /// Sends a fully prepared request to the upstream. Errors cover connect
    /// refusal, DNS failure, timeouts, and read/write I/O failures.
    pub async fn execute(&self, request: Request<Bytes>) -> Result<reqwest::Response, reqwest::Error> {
        let request = reqwest::Request::try_from(request)?;
        self.http.execute(request).await
    }
}
