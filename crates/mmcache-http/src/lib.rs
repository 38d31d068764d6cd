//! mmcache-http: REST control plane for the mmcache client.
//!
//! Provides [`HttpGateway`], the `reqwest` implementation of
//! [`mmcache_core::Gateway`]: one-time credentials, edge-location lookup and
//! generic JSON calls against the fabric API.

pub mod client;

pub use client::HttpGateway;
