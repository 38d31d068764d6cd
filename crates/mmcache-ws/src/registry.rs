//! Connection tracking.
//!
//! Every socket the supervisor opens (consumers and heartbeat carriers, for
//! every attempt of every subscription) is registered here with its own
//! cancellation token, so a single call can force-close all of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Identifier assigned to a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Carries change events for a subscription.
    Consumer,
    /// Carries heartbeats only.
    Heartbeat,
}

/// Snapshot of a tracked connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub kind: ConnectionKind,
    pub subscription: String,
    /// URL without its query string.
    pub url: String,
}

struct Entry {
    info: ConnectionInfo,
    token: CancellationToken,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    entries: Mutex<HashMap<ConnectionId, Entry>>,
}

/// Shared set of live connections.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ConnectionId, Entry>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a freshly opened connection.
    ///
    /// The returned guard's token is a child of `parent`, so cancelling the
    /// owning subscription also terminates the connection. Dropping the
    /// guard deregisters it.
    pub fn track(
        &self,
        kind: ConnectionKind,
        subscription: &str,
        url: &str,
        parent: &CancellationToken,
    ) -> TrackedConnection {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let token = parent.child_token();
        let info = ConnectionInfo {
            id,
            kind,
            subscription: subscription.to_string(),
            url: url.to_string(),
        };
        self.entries().insert(
            id,
            Entry {
                info,
                token: token.clone(),
            },
        );
        tracing::trace!(%id, ?kind, subscription, "connection tracked");
        TrackedConnection {
            id,
            token,
            registry: self.clone(),
        }
    }

    /// Force-close every tracked connection and clear the set.
    /// Returns how many connections were terminated.
    pub fn terminate_all(&self) -> usize {
        let drained: Vec<Entry> = self.entries().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.token.cancel();
        }
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "terminated all tracked connections");
        }
        drained.len()
    }

    /// Snapshot of live connections, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<_> = self.entries().values().map(|e| e.info.clone()).collect();
        list.sort_by_key(|info| info.id);
        list
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: ConnectionId) {
        self.entries().remove(&id);
    }
}

/// Registration guard for one connection.
pub struct TrackedConnection {
    id: ConnectionId,
    token: CancellationToken,
    registry: ConnectionRegistry,
}

impl TrackedConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Fires when the connection has been force-closed.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        tracing::trace!(id = %self.id, "connection untracked");
    }
}
