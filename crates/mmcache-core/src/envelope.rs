//! Stream wire types.
//!
//! Every frame on a subscription socket is a JSON envelope. Inbound frames
//! carry a `messageId` and a base64 payload; the client echoes the id back
//! as an acknowledgment. Heartbeats travel as the literal payload `"noop"`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CacheError;

/// Reserved payload used for heartbeats and their acknowledgments.
pub const NOOP_PAYLOAD: &str = "noop";

/// A message delivered by the change-feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub message_id: String,
    pub payload: String,
}

impl InboundMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, CacheError> {
        Ok(serde_json::from_str(text)?)
    }

    /// `true` for heartbeat traffic that must never reach the application.
    pub fn is_noop(&self) -> bool {
        self.payload == NOOP_PAYLOAD
    }

    /// The acknowledgment frame for this message.
    pub fn ack(&self) -> Ack {
        Ack {
            message_id: self.message_id.clone(),
        }
    }

    /// Decode the payload: base64, then JSON.
    pub fn decode_payload(&self) -> Result<Value, CacheError> {
        decode_payload(&self.payload)
    }
}

/// Acknowledgment echoed back for every inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub message_id: String,
}

impl Ack {
    pub fn to_frame(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Keepalive frame sent on the producer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub payload: String,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            payload: NOOP_PAYLOAD.to_string(),
        }
    }
}

impl Heartbeat {
    pub fn to_frame(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode a base64-encoded JSON payload.
pub fn decode_payload(payload: &str) -> Result<Value, CacheError> {
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| CacheError::Decode(format!("invalid base64 payload: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CacheError::Decode(format!("payload is not valid JSON: {e}")))
}

/// Encode a value the way the service does. Used by producers and tests.
pub fn encode_payload(value: &Value) -> Result<String, CacheError> {
    Ok(STANDARD.encode(serde_json::to_vec(value)?))
}
