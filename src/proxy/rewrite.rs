//! Inbound-to-upstream request rewriting.
//!
//! Takes the parts of a parsed client request and produces the request that
//! goes to the origin: same method, headers and body, with the URL
//! retargeted at the upstream, hop-by-hop headers stripped, and the
//! `X-Forwarded-*` trio describing the original caller.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, HOST};
use http::uri::{Authority, Scheme};
use http::{Request, Uri};

use super::headers::remove_hop_by_hop_headers;
use super::ProxyError;

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// The upstream origin, decomposed once at startup.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub scheme: Scheme,
    pub authority: Authority,
    /// Base path prefixed to every inbound path. `/` when the configured URL
    /// has no path component.
    pub base_path: String,
}

impl UpstreamTarget {
    /// Parses and validates a configured upstream URL. The URL must carry an
    /// http or https scheme and a host.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let uri: Uri = raw
            .parse()
            .map_err(|e| format!("invalid upstream URL '{raw}': {e}"))?;
        let scheme = uri
            .scheme()
            .cloned()
            .ok_or_else(|| format!("upstream URL '{raw}' is missing a scheme"))?;
        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err(format!(
                "upstream URL '{raw}' must use http or https, got '{scheme}'"
            ));
        }
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| format!("upstream URL '{raw}' is missing a host"))?;
        let base_path = match uri.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        Ok(Self {
            scheme,
            authority,
            base_path,
        })
    }
}

/// Builds the upstream request from the inbound request's parts and its
/// fully buffered body.
///
/// `inbound_tls` drives `X-Forwarded-Proto`; this listener is plain TCP, so
/// the server always passes false, but the policy lives here so a TLS
/// front-end only has to flip the flag.
pub fn build_upstream_request(
    parts: &http::request::Parts,
    body: Bytes,
    upstream: &UpstreamTarget,
    peer: SocketAddr,
    preserve_original_host: bool,
    inbound_tls: bool,
) -> Result<Request<Bytes>, ProxyError> {
    let path = single_joining_slash(&upstream.base_path, parts.uri.path());
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };
    let uri = Uri::builder()
        .scheme(upstream.scheme.clone())
        .authority(upstream.authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::Rewrite(e.to_string()))?;

    let inbound_host = parts.headers.get(HOST).cloned();

    let mut request = Request::new(body);
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = uri;
    *request.headers_mut() = parts.headers.clone();

    if !preserve_original_host {
        let host = HeaderValue::from_str(upstream.authority.as_str())
            .map_err(|e| ProxyError::Rewrite(e.to_string()))?;
        request.headers_mut().insert(HOST, host);
    }

    remove_hop_by_hop_headers(request.headers_mut());

    if let Some(host) = inbound_host {
        request.headers_mut().insert(X_FORWARDED_HOST, host);
    }
    let proto = if inbound_tls { "https" } else { "http" };
    request
        .headers_mut()
        .insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
    match HeaderValue::from_str(&peer.ip().to_string()) {
        Ok(client_ip) => {
            request.headers_mut().insert(X_FORWARDED_FOR, client_ip);
        }
        Err(e) => tracing::warn!(%peer, error = %e, "could not derive X-Forwarded-For"),
    }

    Ok(request)
}

/// Joins two path segments with exactly one `/` between them, whatever the
/// segments' own trailing/leading slashes.
fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}
