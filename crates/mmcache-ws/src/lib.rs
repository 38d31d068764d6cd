//! mmcache-ws: resilient WebSocket change-feed subscriptions.
//!
//! # Features
//! - One background task per subscription, reconnecting with exponential backoff
//! - Fresh one-time credential and edge lookup on every attempt
//! - Optional heartbeats on an independent producer connection
//! - Per-subscription and supervisor-wide cancellation
//!
//! ```no_run
//! use std::sync::Arc;
//! use mmcache_core::ClientConfig;
//! use mmcache_http::HttpGateway;
//! use mmcache_ws::{SubscribeOptions, Supervisor};
//!
//! # async fn demo() -> Result<(), mmcache_core::CacheError> {
//! let config = ClientConfig::new("https://gdn.example.com").with_api_key("key");
//! let target = config.target()?;
//! let gateway = Arc::new(HttpGateway::new(config)?);
//! let supervisor = Supervisor::with_websockets(gateway, target)?;
//!
//! let handle = supervisor.subscribe(
//!     "orders",
//!     |event| println!("{event:?}"),
//!     SubscribeOptions::default(),
//! )?;
//! handle.cancel();
//! # Ok(())
//! # }
//! ```

pub mod connector;
pub mod endpoint;
pub mod event;
pub mod heartbeat;
pub mod options;
pub mod registry;
pub mod session;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use connector::{Connector, Socket, TungsteniteConnector};
pub use endpoint::StreamRole;
pub use event::SubscriptionEvent;
pub use heartbeat::{HeartbeatEnd, HeartbeatSender};
pub use options::SubscribeOptions;
pub use registry::{ConnectionId, ConnectionInfo, ConnectionKind, ConnectionRegistry};
pub use session::{SessionEnd, SessionState};
pub use supervisor::{SubscriptionHandle, Supervisor};
