//! Heartbeat sender for the producer (keepalive) connection.
//!
//! The sender is started only after its carrier socket has opened. It sends
//! `{"payload":"noop"}` once per interval, first one a full interval after
//! start, and drains whatever the carrier sends back. A carrier close or
//! error stops it without touching the consumer connection.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use mmcache_core::envelope::Heartbeat;

use crate::connector::Socket;
use crate::registry::TrackedConnection;

/// Why a heartbeat task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEnd {
    Stopped,
    CarrierClosed,
    CarrierError(String),
}

/// Handle to a running heartbeat task.
pub struct HeartbeatSender {
    token: CancellationToken,
    task: Option<JoinHandle<HeartbeatEnd>>,
}

impl HeartbeatSender {
    /// Spawn the heartbeat loop on an already-open carrier.
    ///
    /// The carrier's registration moves into the task, so the connection
    /// leaves the registry as soon as the loop ends.
    pub fn start(socket: Socket, interval: Duration, carrier: TrackedConnection) -> Self {
        let token = carrier.token().clone();
        let task = tokio::spawn(run(socket, interval, carrier));
        Self {
            token,
            task: Some(task),
        }
    }

    /// `true` while the heartbeat loop is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop sending and wait for the task to exit.
    ///
    /// Idempotent. Once this returns no further heartbeat is sent.
    pub async fn stop(&mut self) -> Option<HeartbeatEnd> {
        self.token.cancel();
        let task = self.task.take()?;
        match task.await {
            Ok(end) => Some(end),
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat task failed");
                None
            }
        }
    }
}

impl Drop for HeartbeatSender {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(socket: Socket, interval: Duration, carrier: TrackedConnection) -> HeartbeatEnd {
    let Socket { mut sink, mut stream } = socket;
    let token = carrier.token().clone();

    let frame = match Heartbeat::default().to_frame() {
        Ok(frame) => frame,
        Err(e) => return HeartbeatEnd::CarrierError(e.to_string()),
    };

    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0u64;

    let end = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break HeartbeatEnd::Stopped,
            frame_in = stream.next() => match frame_in {
                None => break HeartbeatEnd::CarrierClosed,
                Some(Err(e)) => break HeartbeatEnd::CarrierError(e.to_string()),
                Some(Ok(_)) => {}
            },
            _ = ticker.tick() => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break HeartbeatEnd::Stopped,
                    res = sink.send(frame.clone()) => {
                        if let Err(e) = res {
                            break HeartbeatEnd::CarrierError(e.to_string());
                        }
                        sent += 1;
                        tracing::trace!(connection = %carrier.id(), sent, "heartbeat sent");
                    }
                }
            }
        }
    };

    match &end {
        HeartbeatEnd::Stopped => {
            tracing::debug!(connection = %carrier.id(), sent, "heartbeat stopped")
        }
        HeartbeatEnd::CarrierClosed => {
            tracing::info!(connection = %carrier.id(), sent, "heartbeat carrier closed")
        }
        HeartbeatEnd::CarrierError(error) => {
            tracing::warn!(
                connection = %carrier.id(),
                sent,
                error = %error,
                "heartbeat carrier failed"
            )
        }
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionKind, ConnectionRegistry};
    use crate::testing::socket_pair;

    fn carrier(registry: &ConnectionRegistry) -> TrackedConnection {
        registry.track(
            ConnectionKind::Heartbeat,
            "orders",
            "wss://edge/producer",
            &CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_beat_after_one_interval() {
        let registry = ConnectionRegistry::new();
        let (socket, mut server) = socket_pair("wss://edge/producer");
        let mut hb = HeartbeatSender::start(socket, Duration::from_secs(30), carrier(&registry));

        time::sleep(Duration::from_secs(29)).await;
        assert!(server.try_recv().is_none());

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(server.try_recv().as_deref(), Some(r#"{"payload":"noop"}"#));

        time::sleep(Duration::from_secs(30)).await;
        assert!(server.try_recv().is_some());

        assert_eq!(hb.stop().await, Some(HeartbeatEnd::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn no_beats_after_stop() {
        let registry = ConnectionRegistry::new();
        let (socket, mut server) = socket_pair("wss://edge/producer");
        let mut hb = HeartbeatSender::start(socket, Duration::from_millis(100), carrier(&registry));

        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(server.drain().len(), 2);

        hb.stop().await;
        assert!(!hb.is_running());
        assert!(registry.is_empty());
        assert_eq!(hb.stop().await, None);

        time::sleep(Duration::from_secs(5)).await;
        assert!(server.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_carrier_closes() {
        let registry = ConnectionRegistry::new();
        let (socket, mut server) = socket_pair("wss://edge/producer");
        let mut hb = HeartbeatSender::start(socket, Duration::from_millis(100), carrier(&registry));

        server.close();
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hb.stop().await, Some(HeartbeatEnd::CarrierClosed));

        time::sleep(Duration::from_secs(1)).await;
        assert!(server.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_carrier_error() {
        let registry = ConnectionRegistry::new();
        let (socket, server) = socket_pair("wss://edge/producer");
        let mut hb = HeartbeatSender::start(socket, Duration::from_millis(100), carrier(&registry));

        server.fail("connection reset");
        time::sleep(Duration::from_millis(10)).await;
        assert!(!hb.is_running());
        assert!(matches!(hb.stop().await, Some(HeartbeatEnd::CarrierError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn registry_termination_stops_beats() {
        let registry = ConnectionRegistry::new();
        let (socket, mut server) = socket_pair("wss://edge/producer");
        let mut hb = HeartbeatSender::start(socket, Duration::from_millis(100), carrier(&registry));

        assert_eq!(registry.terminate_all(), 1);
        time::sleep(Duration::from_secs(1)).await;
        assert!(server.drain().is_empty());
        assert_eq!(hb.stop().await, Some(HeartbeatEnd::Stopped));
    }
}
