//! TTL derivation from origin response headers.
//!
//! Precedence: the first positive `max-age`/`s-maxage` directive in
//! `Cache-Control` wins; failing that, a parseable `Expires` date in the
//! future; failing that, no hint, and the caller falls back to the cache's
//! default TTL. `no-cache`, `no-store` and `private` are deliberately not
//! consulted here, which deviates from RFC 7234; revisiting that is tracked
//! in DESIGN.md.

use std::time::SystemTime;

use http::header::{CACHE_CONTROL, EXPIRES};
use http::HeaderMap;

/// Returns the TTL in seconds the response headers ask for, or `None` when
/// they carry no usable freshness hint.
pub fn ttl_from_headers(headers: &HeaderMap) -> Option<u64> {
    if let Some(secs) = max_age_directive(headers) {
        return Some(secs);
    }
    expires_ttl(headers)
}

/// Extracts the first positive `max-age` or `s-maxage` value. Both carry
/// equal precedence; parsing is case-insensitive and tolerates whitespace
/// around directives. Zero, negative, and unparseable values are skipped.
fn max_age_directive(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CACHE_CONTROL)?.to_str().ok()?;
    let value = value.to_ascii_lowercase();
    for directive in value.split(',') {
        let directive = directive.trim();
        let raw = directive
            .strip_prefix("max-age=")
            .or_else(|| directive.strip_prefix("s-maxage="));
        if let Some(raw) = raw {
            if let Ok(secs) = raw.trim().parse::<u64>() {
                if secs > 0 {
                    return Some(secs);
                }
            }
        }
    }
    None
}

/// Seconds until the `Expires` HTTP-date, if it parses and lies in the
/// future. A date in the past yields no hint rather than pinning a dead
/// entry.
fn expires_ttl(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(EXPIRES)?.to_str().ok()?;
    let when = httpdate::parse_http_date(raw).ok()?;
    let remaining = when.duration_since(SystemTime::now()).ok()?;
    let secs = remaining.as_secs();
    if secs > 0 {
        Some(secs)
    } else {
        None
    }
}
