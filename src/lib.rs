//! Palisade is a caching HTTP/1.1 reverse proxy.
//!
//! Inbound requests are forwarded to a single configured upstream origin.
//! `GET` responses are kept in a bounded in-process LRU cache with per-entry
//! TTLs derived from the origin's `Cache-Control`/`Expires` headers, so
//! repeated reads are served without touching the upstream at all.

pub mod cache;
pub mod client;
pub mod config;
pub mod proxy;
pub mod telemetry;
