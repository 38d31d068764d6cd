//! Client error taxonomy.

use thiserror::Error;

/// Errors raised by the mmcache client.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Invalid caller input (missing subscription name, malformed host, ...).
    /// Always raised before any I/O happens.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// WebSocket connect/send/receive failure or close.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP request failed before a response status was available.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success status returned by the gateway REST API.
    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },

    /// The retry budget of a subscription has been spent.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// A message payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// JSON (de)serialization failure.
    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Returns `true` if the failure is transient and worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Http(_) | Self::Remote { .. }
        )
    }

    /// Returns `true` for caller mistakes that no retry can fix.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CacheError::Transport("reset".into()).is_retryable());
        let busy = CacheError::Remote {
            status: 503,
            message: "busy".into(),
        };
        assert!(busy.is_retryable());
        assert!(!CacheError::Configuration("no name".into()).is_retryable());
        let exhausted = CacheError::RetryExhausted {
            attempts: 3,
            last_error: "x".into(),
        };
        assert!(!exhausted.is_retryable());
    }

    #[test]
    fn display_remote() {
        let e = CacheError::Remote {
            status: 401,
            message: "unauthorized".into(),
        };
        assert_eq!(e.to_string(), "remote error 401: unauthorized");
    }
}
