//! One subscription attempt.
//!
//! State transitions:
//! - `Connecting` → `Open`:    edge host + credential resolved, consumer socket opened
//! - `Open` → `Closed`:        server closed the socket, or it was force-closed
//! - `Open` → `Errored`:       transport error while receiving or acknowledging
//! - `Connecting` → `Errored`: resolution or connect failure
//!
//! `Closed` and `Errored` both hand control back to the supervisor, which
//! decides whether to try again.

use std::collections::BTreeMap;
use std::future::Future;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use mmcache_core::config::SubscriptionTarget;
use mmcache_core::envelope::InboundMessage;
use mmcache_core::error::CacheError;
use mmcache_core::gateway::Gateway;

use crate::connector::{Connector, Socket};
use crate::endpoint::{redact, stream_url, StreamRole};
use crate::heartbeat::HeartbeatSender;
use crate::options::SubscribeOptions;
use crate::registry::{ConnectionKind, ConnectionRegistry, TrackedConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
    Errored,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The consumer connection closed.
    Closed,
    /// Resolution, connect, receive or acknowledgment failed.
    Errored(CacheError),
    /// The owning subscription was cancelled. Nothing should follow.
    Cancelled,
}

impl SessionEnd {
    /// Human-readable reason passed along with retry notifications.
    pub fn reason(&self) -> String {
        match self {
            Self::Closed => "connection closed".into(),
            Self::Errored(e) => e.to_string(),
            Self::Cancelled => "cancelled".into(),
        }
    }
}

/// Everything a session borrows from its supervisor.
pub struct SessionContext<'a> {
    pub gateway: &'a dyn Gateway,
    pub connector: &'a dyn Connector,
    pub registry: &'a ConnectionRegistry,
    pub target: &'a SubscriptionTarget,
    pub options: &'a SubscribeOptions,
    /// Cancellation token of the owning subscription.
    pub cancel: &'a CancellationToken,
}

struct Opened {
    host: String,
    socket: Socket,
    tracked: TrackedConnection,
    url: String,
}

/// A single consumer connection's lifecycle.
#[derive(Debug)]
pub struct Session {
    name: String,
    state: SessionState,
    last_message_id: Option<String>,
    delivered: u64,
}

impl Session {
    pub fn new(subscription: impl Into<String>) -> Self {
        Self {
            name: subscription.into(),
            state: SessionState::Connecting,
            last_message_id: None,
            delivered: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id of the last message acknowledged on this session.
    pub fn last_message_id(&self) -> Option<&str> {
        self.last_message_id.as_deref()
    }

    /// Number of payloads handed to the consumer callback.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Drive the session until its consumer connection goes away.
    ///
    /// Every decoded, non-heartbeat payload is passed to `deliver` exactly
    /// once, after its acknowledgment has been sent. With keep-alive, the
    /// heartbeat carrier opens while the consumer is already being read.
    pub async fn run<F>(&mut self, ctx: &SessionContext<'_>, deliver: &mut F) -> SessionEnd
    where
        F: FnMut(Value) + Send,
    {
        self.state = SessionState::Connecting;

        let end = match open(ctx, &self.name, StreamRole::Consumer, None).await {
            Err(end) => end,
            Ok(opened) => {
                self.state = SessionState::Open;
                tracing::info!(
                    subscription = %self.name,
                    connection = %opened.tracked.id(),
                    url = %opened.url,
                    "subscription open"
                );

                let Opened {
                    host,
                    socket,
                    tracked,
                    ..
                } = opened;
                let name = self.name.clone();
                let carrier = start_heartbeat(ctx, &name, &host);
                let mut heartbeat = None;
                let end = self
                    .pump(ctx, socket, &tracked, carrier, &mut heartbeat, deliver)
                    .await;

                if let Some(hb) = heartbeat.as_mut() {
                    hb.stop().await;
                }
                end
            }
        };

        self.state = match end {
            SessionEnd::Errored(_) => SessionState::Errored,
            _ => SessionState::Closed,
        };
        match &end {
            SessionEnd::Errored(e) => {
                tracing::warn!(subscription = %self.name, error = %e, "session failed")
            }
            SessionEnd::Closed => {
                tracing::info!(
                    subscription = %self.name,
                    delivered = self.delivered,
                    "session closed"
                )
            }
            SessionEnd::Cancelled => {
                tracing::debug!(subscription = %self.name, "session cancelled")
            }
        }
        end
    }

    /// Receive, acknowledge and deliver until the connection goes away.
    ///
    /// `carrier` opens the heartbeat connection. It is polled only with
    /// keep-alive on, alongside the consumer, and its result lands in
    /// `heartbeat`.
    async fn pump<F, C>(
        &mut self,
        ctx: &SessionContext<'_>,
        socket: Socket,
        tracked: &TrackedConnection,
        carrier: C,
        heartbeat: &mut Option<HeartbeatSender>,
        deliver: &mut F,
    ) -> SessionEnd
    where
        F: FnMut(Value) + Send,
        C: Future<Output = Option<HeartbeatSender>>,
    {
        let Socket { mut sink, mut stream } = socket;
        tokio::pin!(carrier);
        let mut carrier_pending = ctx.options.keep_alive;

        loop {
            let frame = tokio::select! {
                biased;
                _ = tracked.token().cancelled() => return terminated(ctx),
                started = &mut carrier, if carrier_pending => {
                    carrier_pending = false;
                    *heartbeat = started;
                    continue;
                }
                frame = stream.next() => frame,
            };

            let text = match frame {
                None => return SessionEnd::Closed,
                Some(Err(e)) => return SessionEnd::Errored(e),
                Some(Ok(text)) => text,
            };

            let msg = match InboundMessage::parse(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(
                        subscription = %self.name,
                        error = %e,
                        "skipping malformed frame"
                    );
                    continue;
                }
            };

            let ack = match msg.ack().to_frame() {
                Ok(ack) => ack,
                Err(e) => return SessionEnd::Errored(e),
            };
            let sent = tokio::select! {
                biased;
                _ = tracked.token().cancelled() => return terminated(ctx),
                res = sink.send(ack) => res,
            };
            if let Err(e) = sent {
                return SessionEnd::Errored(e);
            }
            self.last_message_id = Some(msg.message_id.clone());

            if msg.is_noop() {
                tracing::trace!(subscription = %self.name, "noop acknowledged");
                continue;
            }

            match msg.decode_payload() {
                Ok(value) => {
                    if tracked.is_terminated() {
                        return terminated(ctx);
                    }
                    self.delivered += 1;
                    deliver(value);
                }
                Err(e) => tracing::warn!(
                    subscription = %self.name,
                    message_id = %msg.message_id,
                    error = %e,
                    "dropping undecodable payload"
                ),
            }
        }
    }
}

/// Resolve host and credential, then open and register a socket.
async fn open(
    ctx: &SessionContext<'_>,
    subscription: &str,
    role: StreamRole,
    host: Option<&str>,
) -> Result<Opened, SessionEnd> {
    let host = match host.map(str::to_string).or_else(|| ctx.options.edge_host.clone()) {
        Some(host) => host,
        None => until_cancelled(ctx.cancel, ctx.gateway.request_edge_endpoint()).await?.host,
    };
    let credential = until_cancelled(ctx.cancel, ctx.gateway.request_credential()).await?;

    let (name, query, kind) = match role {
        StreamRole::Consumer => (
            Some(subscription),
            ctx.options.query.clone(),
            ConnectionKind::Consumer,
        ),
        StreamRole::Producer => (None, BTreeMap::new(), ConnectionKind::Heartbeat),
    };
    let url = stream_url(role, &host, ctx.target, name, &credential, &query)
        .map_err(SessionEnd::Errored)?;

    let socket = until_cancelled(ctx.cancel, ctx.connector.connect(&url)).await?;
    let tracked = ctx.registry.track(kind, subscription, redact(&url), ctx.cancel);

    Ok(Opened {
        host,
        socket,
        tracked,
        url: redact(&url).to_string(),
    })
}

/// Open the producer connection and start heartbeats on it.
///
/// A failure here is logged and leaves the consumer running.
async fn start_heartbeat(
    ctx: &SessionContext<'_>,
    subscription: &str,
    host: &str,
) -> Option<HeartbeatSender> {
    match open(ctx, subscription, StreamRole::Producer, Some(host)).await {
        Ok(opened) => {
            tracing::debug!(
                subscription,
                connection = %opened.tracked.id(),
                interval_ms = ctx.options.heartbeat_interval.as_millis() as u64,
                "heartbeat carrier open"
            );
            Some(HeartbeatSender::start(
                opened.socket,
                ctx.options.heartbeat_interval,
                opened.tracked,
            ))
        }
        Err(SessionEnd::Errored(e)) => {
            tracing::warn!(subscription, error = %e, "heartbeat carrier failed to open");
            None
        }
        Err(_) => None,
    }
}

/// A force-closed connection is a cancellation only if the subscription
/// itself was cancelled; otherwise it is a failure worth retrying.
fn terminated(ctx: &SessionContext<'_>) -> SessionEnd {
    if ctx.cancel.is_cancelled() {
        SessionEnd::Cancelled
    } else {
        SessionEnd::Errored(CacheError::Transport("connection terminated".into()))
    }
}

async fn until_cancelled<T, Fut>(cancel: &CancellationToken, fut: Fut) -> Result<T, SessionEnd>
where
    Fut: Future<Output = Result<T, CacheError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionEnd::Cancelled),
        res = fut => res.map_err(SessionEnd::Errored),
    }
}
