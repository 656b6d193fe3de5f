//! The proxy pipeline and the HTTP/1.1 listener.
//!
//! Each inbound request runs through one pass of [`handle_request`]:
//! cache lookup for `GET` when a cache is attached, otherwise rewrite →
//! send → buffer the upstream body → optionally store → write out. Errors
//! are turned into HTTP statuses here and nowhere below.

pub mod freshness;
pub mod headers;
pub mod rewrite;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::TtlLruCache;
use crate::client::UpstreamClient;
use rewrite::UpstreamTarget;

/// The cache as the proxy uses it: inbound URL → stored response.
pub type ResponseCache = TtlLruCache<String, CachedResponse>;

/// An origin response frozen for replay. Immutable once stored; `Bytes`
/// makes clones cheap. The authoritative expiry lives in the cache entry.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cached_at: SystemTime,
}

/// Failures inside one pipeline pass. Each kind maps to exactly one
/// client-visible status; the mapping lives on the enum so the handler
/// cannot drift from it.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to build upstream request: {0}")]
    Rewrite(String),
    #[error("upstream transport failure: {0}")]
    Upstream(#[source] reqwest::Error),
    #[error("failed to read upstream response body: {0}")]
    BodyRead(#[source] reqwest::Error),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::Rewrite(_) | ProxyError::BodyRead(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn client_message(&self) -> &'static str {
        match self {
            ProxyError::Rewrite(_) => "bad upstream request",
            ProxyError::Upstream(_) => "upstream error",
            ProxyError::BodyRead(_) => "error reading response",
        }
    }
}

/// Everything a request handler needs, shared across all connections.
pub struct ProxyContext {
    pub upstream: UpstreamTarget,
    pub client: UpstreamClient,
    pub cache: Option<ResponseCache>,
    pub preserve_original_host: bool,
}

/// One inbound request, start to finish.
pub async fn handle_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    ctx: Arc<ProxyContext>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    // Only GET requests are eligible for lookup and store; the key is the
    // URL exactly as the client sent it.
    let cache_key = req.uri().to_string();
    let cacheable = method == Method::GET;

    if cacheable {
        if let Some(cache) = &ctx.cache {
            debug!(key = %cache_key, "checking cache");
            if let Some(cached) = cache.get(&cache_key) {
                debug!(key = %cache_key, "cache hit");
                let response = replay_cached_response(&cached);
                info!(
                    %method,
                    %path,
                    status = cached.status.as_u16(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    served = "cache",
                    "request complete"
                );
                return Ok(response);
            }
            debug!(key = %cache_key, "cache miss");
        }
    }

    match forward(req, peer, &ctx, &cache_key, cacheable).await {
        Ok(response) => {
            info!(
                %method,
                %path,
                status = response.status().as_u16(),
                latency_ms = started.elapsed().as_millis() as u64,
                served = "upstream",
                "request complete"
            );
            Ok(response)
        }
        Err(e) => {
            error!(%method, %path, error = %e, "proxy pipeline failed");
            Ok(text_response(e.status(), e.client_message()))
        }
    }
}

/// The miss path: rewrite, send, drain the body, store when eligible, and
/// build the client response from the buffered bytes.
async fn forward(
    req: Request<Incoming>,
    peer: SocketAddr,
    ctx: &ProxyContext,
    cache_key: &str,
    cacheable: bool,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ProxyError> {
    let (parts, inbound_body) = req.into_parts();
    let inbound_body = inbound_body
        .collect()
        .await
        .map_err(|e| ProxyError::Rewrite(e.to_string()))?
        .to_bytes();

    let outbound = rewrite::build_upstream_request(
        &parts,
        inbound_body,
        &ctx.upstream,
        peer,
        ctx.preserve_original_host,
        false,
    )?;
    debug!(uri = %outbound.uri(), "forwarding to upstream");

    let upstream_response = ctx
        .client
        .execute(outbound)
        .await
        .map_err(ProxyError::Upstream)?;

    let status = upstream_response.status();
    let mut response_headers = upstream_response.headers().clone();
    // The whole body is buffered before anything is written to the client,
    // so the cache stores exactly the bytes the client receives.
    let body = upstream_response
        .bytes()
        .await
        .map_err(ProxyError::BodyRead)?;

    headers::remove_hop_by_hop_headers(&mut response_headers);

    if cacheable {
        if let Some(cache) = &ctx.cache {
            let cached = CachedResponse {
                status,
                headers: response_headers.clone(),
                body: body.clone(),
                cached_at: SystemTime::now(),
            };
            let ttl = freshness::ttl_from_headers(&cached.headers);
            debug!(key = %cache_key, ?ttl, "storing response");
            let stored = match ttl {
                Some(secs) => cache.set_with_ttl(cache_key.to_string(), cached, secs as i64),
                None => cache.set(cache_key.to_string(), cached),
            };
            if let Err(e) = stored {
                error!(key = %cache_key, error = %e, "cache store failed");
            }
        }
    }

    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

/// Rebuilds a client response from a stored one: every header name/value
/// pair in order, then status, then the buffered body.
fn replay_cached_response(cached: &CachedResponse) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full_body(cached.body.clone()));
    *response.status_mut() = cached.status;
    *response.headers_mut() = cached.headers.clone();
    response
}

fn full_body(bytes: Bytes) -> BoxBody<Bytes, hyper::Error> {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

fn text_response(
    status: StatusCode,
    message: &'static str,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full_body(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Accept loop. Each connection gets its own task running hyper's HTTP/1.1
/// state machine; each request on it goes through [`handle_request`].
/// Cancelling `shutdown` stops accepting; in-flight connections finish on
/// their own tasks.
pub async fn run_server(listener: TcpListener, ctx: Arc<ProxyContext>, shutdown: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("no longer accepting connections");
                break;
            }
        };

        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let ctx = Arc::clone(&ctx);
                async move { handle_request(req, peer, ctx).await }
            });
            // Write failures to the client land here; the response is
            // already committed, so they are logged and dropped.
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, error = ?e, "connection closed with error");
            }
        });
    }
}
