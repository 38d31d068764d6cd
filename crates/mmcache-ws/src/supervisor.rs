//! Subscription supervisor with reconnect, backoff and cancellation.
//!
//! Each `subscribe` call spawns one background task that owns its own
//! [`Backoff`] and runs [`Session`]s back to back until the subscription is
//! cancelled or the retry budget is spent.
//!
//! Callbacks run behind a per-subscription gate. Once `cancel` or
//! `cancel_all` returns, no callback of the cancelled subscriptions is
//! still running on another thread and none will start.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use mmcache_core::config::SubscriptionTarget;
use mmcache_core::error::CacheError;
use mmcache_core::gateway::Gateway;
use mmcache_core::policy::Backoff;

use crate::connector::{Connector, TungsteniteConnector};
use crate::event::SubscriptionEvent;
use crate::options::SubscribeOptions;
use crate::registry::{ConnectionInfo, ConnectionRegistry};
use crate::session::{Session, SessionContext, SessionEnd};

struct Inner {
    gateway: Arc<dyn Gateway>,
    connector: Arc<dyn Connector>,
    target: SubscriptionTarget,
    registry: ConnectionRegistry,
    /// Parent of every subscription token; replaced on `cancel_all`.
    root: Mutex<CancellationToken>,
    gates: Mutex<Vec<Weak<CallbackGate>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct GateState {
    closed: bool,
    running: Option<ThreadId>,
}

/// Excludes callbacks from cancellation.
#[derive(Debug, Default)]
struct CallbackGate {
    state: Mutex<GateState>,
    idle: Condvar,
}

impl CallbackGate {
    /// Run `f` unless the gate is closed.
    fn invoke(&self, f: impl FnOnce()) {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.running = Some(thread::current().id());
        }

        struct Finished<'a>(&'a CallbackGate);
        impl Drop for Finished<'_> {
            fn drop(&mut self) {
                lock(&self.0.state).running = None;
                self.0.idle.notify_all();
            }
        }

        let _finished = Finished(self);
        f();
    }

    /// Refuse further callbacks and wait out one running on another thread.
    /// Called from inside a callback, returns at once.
    fn close(&self) {
        let me = thread::current().id();
        let mut state = lock(&self.state);
        state.closed = true;
        while state.running.is_some_and(|id| id != me) {
            state = self.idle.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Entry point for change-feed subscriptions on one cache.
///
/// Cheap to clone; clones share the connection registry and cancellation.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Build a supervisor for `target`.
    pub fn new(
        gateway: Arc<dyn Gateway>,
        connector: Arc<dyn Connector>,
        target: SubscriptionTarget,
    ) -> Result<Self, CacheError> {
        target.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                gateway,
                connector,
                target,
                registry: ConnectionRegistry::new(),
                root: Mutex::new(CancellationToken::new()),
                gates: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Build a supervisor that opens real WebSocket connections.
    pub fn with_websockets(
        gateway: Arc<dyn Gateway>,
        target: SubscriptionTarget,
    ) -> Result<Self, CacheError> {
        Self::new(gateway, Arc::new(TungsteniteConnector), target)
    }

    pub fn target(&self) -> &SubscriptionTarget {
        &self.inner.target
    }

    fn root(&self) -> MutexGuard<'_, CancellationToken> {
        lock(&self.inner.root)
    }

    /// Subscribe to `subscription`, invoking `on_event` for every event.
    ///
    /// Configuration problems are returned here, before anything is spawned.
    /// Everything else (resolution failures, socket errors, closes) is
    /// reported through `on_event` as `Retry` / `Exhausted`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(
        &self,
        subscription: &str,
        on_event: F,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, CacheError>
    where
        F: FnMut(SubscriptionEvent) + Send + 'static,
    {
        self.start(subscription, options, |_| on_event)
    }

    /// Like [`Supervisor::subscribe`], delivering events on a channel.
    ///
    /// The channel closes once the subscription terminates. Dropping the
    /// receiver cancels the subscription at its next event.
    pub fn subscribe_channel(
        &self,
        subscription: &str,
        options: SubscribeOptions,
    ) -> Result<(SubscriptionHandle, mpsc::UnboundedReceiver<SubscriptionEvent>), CacheError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = subscription.trim().to_string();
        let handle = self.start(subscription, options, move |token| {
            move |event| {
                if tx.send(event).is_err() && !token.is_cancelled() {
                    tracing::info!(subscription = %name, "event receiver dropped, cancelling");
                    token.cancel();
                }
            }
        })?;
        Ok((handle, rx))
    }

    /// Validate, then spawn the subscription task. `make` builds the
    /// callback from the subscription's own token.
    fn start<F, M>(
        &self,
        subscription: &str,
        options: SubscribeOptions,
        make: M,
    ) -> Result<SubscriptionHandle, CacheError>
    where
        F: FnMut(SubscriptionEvent) + Send + 'static,
        M: FnOnce(CancellationToken) -> F,
    {
        let name = subscription.trim();
        if name.is_empty() {
            return Err(CacheError::Configuration("subscription name is required".into()));
        }
        if name.contains(['/', '?', '#']) {
            return Err(CacheError::Configuration(format!(
                "invalid subscription name {name:?}"
            )));
        }
        options.validate()?;
        let backoff = Backoff::new(options.backoff_config())?;

        let token = self.root().child_token();
        let gate = Arc::new(CallbackGate::default());
        {
            let mut gates = lock(&self.inner.gates);
            gates.retain(|g| g.strong_count() > 0);
            gates.push(Arc::downgrade(&gate));
        }

        let name = name.to_string();
        let on_event = make(token.clone());
        let task = tokio::spawn(supervise(
            Arc::clone(&self.inner),
            name.clone(),
            options,
            backoff,
            token.clone(),
            Arc::clone(&gate),
            on_event,
        ));

        Ok(SubscriptionHandle {
            name,
            token,
            gate,
            task,
        })
    }

    /// Cancel every subscription started by this supervisor and force-close
    /// every connection it opened. The supervisor stays usable afterwards.
    ///
    /// Blocks while a callback of one of those subscriptions is running on
    /// another thread.
    pub fn cancel_all(&self) {
        let previous = std::mem::replace(&mut *self.root(), CancellationToken::new());
        previous.cancel();
        let closed = self.inner.registry.terminate_all();

        let gates: Vec<_> = lock(&self.inner.gates).drain(..).collect();
        for gate in gates.iter().filter_map(Weak::upgrade) {
            gate.close();
        }
        tracing::info!(closed, "cancelled all subscriptions");
    }

    /// Number of live tracked connections (consumers and heartbeat carriers).
    pub fn open_connections(&self) -> usize {
        self.inner.registry.len()
    }

    /// Snapshot of live tracked connections.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner.registry.connections()
    }
}

/// Handle to one running subscription.
///
/// Dropping the handle does not cancel the subscription; use
/// [`SubscriptionHandle::cancel`] or [`Supervisor::cancel_all`].
#[derive(Debug)]
pub struct SubscriptionHandle {
    name: String,
    token: CancellationToken,
    gate: Arc<CallbackGate>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the subscription: closes its connections, drops any pending
    /// reconnect timer and suppresses every further callback.
    ///
    /// If the callback is running on another thread, waits for it to return.
    pub fn cancel(&self) {
        self.token.cancel();
        self.gate.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `true` once the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the background task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(subscription = %self.name, error = %e, "subscription task failed");
        }
    }
}

async fn supervise<F>(
    inner: Arc<Inner>,
    name: String,
    options: SubscribeOptions,
    mut backoff: Backoff,
    token: CancellationToken,
    gate: Arc<CallbackGate>,
    mut on_event: F,
) where
    F: FnMut(SubscriptionEvent) + Send + 'static,
{
    let ctx = SessionContext {
        gateway: inner.gateway.as_ref(),
        connector: inner.connector.as_ref(),
        registry: &inner.registry,
        target: &inner.target,
        options: &options,
        cancel: &token,
    };

    loop {
        let mut session = Session::new(name.as_str());
        let end = session
            .run(&ctx, &mut |value: Value| {
                if !token.is_cancelled() {
                    gate.invoke(|| on_event(SubscriptionEvent::Message(value)));
                }
            })
            .await;

        if matches!(end, SessionEnd::Cancelled) || token.is_cancelled() {
            break;
        }
        let reason = end.reason();

        if backoff.should_retry() {
            let attempt = backoff.attempts();
            let delay = backoff.next_delay(attempt);
            tracing::warn!(
                subscription = %name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "subscription lost, reconnecting"
            );
            gate.invoke(|| {
                on_event(SubscriptionEvent::Retry {
                    attempt,
                    message: reason,
                })
            });

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = time::sleep(delay) => {}
            }
        } else {
            let error = CacheError::RetryExhausted {
                attempts: backoff.attempts() + 1,
                last_error: reason,
            };
            tracing::error!(subscription = %name, error = %error, "giving up on subscription");
            gate.invoke(|| {
                on_event(SubscriptionEvent::Exhausted {
                    message: error.to_string(),
                })
            });
            break;
        }
    }

    tracing::debug!(subscription = %name, "subscription task finished");
}
