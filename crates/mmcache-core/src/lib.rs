//! mmcache-core: foundation types for the mmcache client.
//!
//! # Overview
//!
//! The core crate defines:
//!
//! - [`Gateway`]: the async trait for the REST control plane (credentials, edge lookup)
//! - [`InboundMessage`] / [`Ack`] / [`Heartbeat`]: stream wire envelopes
//! - [`CacheError`]: structured error type
//! - [`ClientConfig`] / [`SubscriptionTarget`]: configuration
//! - [`policy`] module: the exponential backoff scheduler

pub mod config;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod policy;

pub use config::{ClientConfig, SubscriptionTarget};
pub use envelope::{Ack, Heartbeat, InboundMessage, NOOP_PAYLOAD};
pub use error::CacheError;
pub use gateway::{ApiRequest, Credential, EdgeEndpoint, Gateway, HttpMethod};
pub use policy::{Backoff, BackoffConfig};
