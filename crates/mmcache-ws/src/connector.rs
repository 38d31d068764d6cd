//! Transport seam: opening text-frame sockets.
//!
//! A [`Socket`] is the client's view of one connection:
//! - open    → `Connector::connect` resolved
//! - message → `stream` yields `Ok(text)`
//! - error   → `stream` yields `Err(..)`
//! - close   → `stream` ends
//! - terminate → drop the socket

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use mmcache_core::error::CacheError;

use crate::endpoint::redact;

/// Outbound half of a socket.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = CacheError> + Send>>;

/// Inbound half of a socket.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, CacheError>> + Send>>;

/// An open, text-framed connection.
pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Socket {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

/// Opens sockets. Object-safe so the supervisor can hold `Arc<dyn Connector>`.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Socket, CacheError>;
}

/// Real WebSocket connector backed by `tokio-tungstenite`.
///
/// Ping/pong and binary frames are not surfaced; a close frame ends the
/// stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Socket, CacheError> {
        tracing::debug!(url = %redact(url), "opening WebSocket");
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| CacheError::Transport(e.to_string()))?;
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(|e| CacheError::Transport(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, CacheError>(Message::Text(text.into()))));

        let stream = stream
            .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    Ok(_) => None,
                    Err(e) => Some(Err(CacheError::Transport(e.to_string()))),
                })
            });

        Ok(Socket::new(Box::pin(sink), Box::pin(stream)))
    }
}
