//! Hop-by-hop header hygiene.
//!
//! Per RFC 7230 §6.1 these headers describe the single transport connection
//! they arrived on and must not be forwarded by an intermediary. The proxy
//! strips them from the outbound request and again from the upstream
//! response before it is cached or written to the client.

use http::header::{self, HeaderMap, HeaderName};

pub const HOP_BY_HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Removes every hop-by-hop header, including repeated values.
pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
