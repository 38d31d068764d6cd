//! In-memory gateway and connector used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use mmcache_core::envelope::encode_payload;
use mmcache_core::error::CacheError;
use mmcache_core::gateway::{ApiRequest, Credential, EdgeEndpoint, Gateway};

use crate::connector::{Connector, Socket};

/// Server side of an in-memory socket.
pub(crate) struct ServerEnd {
    pub url: String,
    to_client: Option<fmpsc::UnboundedSender<Result<String, CacheError>>>,
    from_client: fmpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.unbounded_send(Ok(text.into())).is_ok())
    }

    pub fn send_message(&self, id: &str, value: &Value) -> bool {
        let payload = encode_payload(value).unwrap();
        self.send(serde_json::json!({"messageId": id, "payload": payload}).to_string())
    }

    pub fn send_noop(&self, id: &str) -> bool {
        self.send(serde_json::json!({"messageId": id, "payload": "noop"}).to_string())
    }

    pub fn fail(&self, reason: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.unbounded_send(Err(CacheError::Transport(reason.into())));
        }
    }

    /// Close the connection from the server side.
    pub fn close(&mut self) {
        self.to_client = None;
    }

    pub fn try_recv(&mut self) -> Option<String> {
        match self.from_client.try_next() {
            Ok(Some(frame)) => Some(frame),
            _ => None,
        }
    }

    pub fn drain(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// `true` once the client dropped its half and nothing is left to read.
    pub fn client_gone(&mut self) -> bool {
        matches!(self.from_client.try_next(), Ok(None))
    }
}

pub(crate) fn socket_pair(url: &str) -> (Socket, ServerEnd) {
    let (to_client, client_rx) = fmpsc::unbounded();
    let (client_tx, from_client) = fmpsc::unbounded::<String>();
    let sink = client_tx.sink_map_err(|e| CacheError::Transport(e.to_string()));
    let socket = Socket::new(Box::pin(sink), Box::pin(client_rx));
    let server = ServerEnd {
        url: url.to_string(),
        to_client: Some(to_client),
        from_client,
    };
    (socket, server)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Refuse,
    Hang,
}

#[derive(Default)]
struct ConnectorState {
    urls: Vec<String>,
    fail_remaining: usize,
    always_fail: bool,
    /// Faults keyed by 1-based connect ordinal.
    faults: HashMap<usize, Fault>,
}

pub(crate) struct MockConnector {
    state: Mutex<ConnectorState>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl MockConnector {
    /// Accepts every connection; server ends arrive on the receiver.
    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            state: Mutex::new(ConnectorState::default()),
            accepted,
        });
        (connector, rx)
    }

    /// Every connection attempt errors.
    pub fn refusing() -> Arc<Self> {
        let (connector, _rx) = Self::accepting();
        connector.state.lock().unwrap().always_fail = true;
        connector
    }

    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().fail_remaining = n;
    }

    /// Refuse the `n`-th connect (1-based).
    pub fn refuse_connect(&self, n: usize) {
        self.state.lock().unwrap().faults.insert(n, Fault::Refuse);
    }

    /// Never complete the `n`-th connect (1-based).
    pub fn hang_connect(&self, n: usize) {
        self.state.lock().unwrap().faults.insert(n, Fault::Hang);
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().urls.len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Socket, CacheError> {
        let fault = {
            let mut state = self.state.lock().unwrap();
            state.urls.push(url.to_string());
            let ordinal = state.urls.len();
            if state.always_fail {
                Some(Fault::Refuse)
            } else if state.fail_remaining > 0 {
                state.fail_remaining -= 1;
                Some(Fault::Refuse)
            } else {
                state.faults.get(&ordinal).copied()
            }
        };
        match fault {
            Some(Fault::Refuse) => return Err(CacheError::Transport("connection refused".into())),
            Some(Fault::Hang) => return futures::future::pending().await,
            None => {}
        }
        let (socket, server) = socket_pair(url);
        let _ = self.accepted.send(server);
        Ok(socket)
    }
}

pub(crate) struct MockGateway {
    host: String,
    credentials: AtomicU32,
    endpoints: AtomicU32,
    fail_credentials: AtomicBool,
}

impl MockGateway {
    pub fn new(host: &str) -> Arc<Self> {
        Arc::new(Self {
            host: host.to_string(),
            credentials: AtomicU32::new(0),
            endpoints: AtomicU32::new(0),
            fail_credentials: AtomicBool::new(false),
        })
    }

    pub fn fail_credentials(&self, fail: bool) {
        self.fail_credentials.store(fail, Ordering::SeqCst);
    }

    pub fn credential_requests(&self) -> u32 {
        self.credentials.load(Ordering::SeqCst)
    }

    pub fn endpoint_requests(&self) -> u32 {
        self.endpoints.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn request_credential(&self) -> Result<Credential, CacheError> {
        let n = self.credentials.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_credentials.load(Ordering::SeqCst) {
            return Err(CacheError::Remote {
                status: 503,
                message: "token service unavailable".into(),
            });
        }
        Ok(Credential::new(format!("otp-{n}")))
    }

    async fn request_edge_endpoint(&self) -> Result<EdgeEndpoint, CacheError> {
        self.endpoints.fetch_add(1, Ordering::SeqCst);
        Ok(EdgeEndpoint::new(self.host.clone()))
    }

    async fn request(&self, _req: ApiRequest) -> Result<Value, CacheError> {
        Ok(Value::Null)
    }
}
