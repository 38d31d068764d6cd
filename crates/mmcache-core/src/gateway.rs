//! The `Gateway` trait, the REST collaborator the stream client depends on.
//!
//! The stream client only needs two things from the REST side: a fresh
//! one-time credential and the nearest edge host. Both are resolved again
//! for every connection attempt.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CacheError;

/// Short-lived, single-use token issued by the token service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Host of the nearest regional gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEndpoint {
    pub host: String,
}

impl EdgeEndpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl fmt::Display for EdgeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// A generic REST call.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    /// Resolve `path` against the federation URL instead of the fabric API.
    pub absolute_path: bool,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn absolute(mut self) -> Self {
        self.absolute_path = true;
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Control-plane calls consumed by the stream client.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; the supervisor shares one instance
/// across every subscription task as `Arc<dyn Gateway>`.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// Issue a fresh one-time credential.
    async fn request_credential(&self) -> Result<Credential, CacheError>;

    /// Resolve the nearest edge host.
    async fn request_edge_endpoint(&self) -> Result<EdgeEndpoint, CacheError>;

    /// Perform an arbitrary REST call and return the JSON body.
    async fn request(&self, req: ApiRequest) -> Result<Value, CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let c = Credential::new("s3cr3t");
        assert_eq!(format!("{c:?}"), "Credential(***)");
        assert_eq!(c.expose(), "s3cr3t");
    }

    #[test]
    fn request_builder() {
        let req = ApiRequest::post("/apid/otp")
            .absolute()
            .with_query("b", "2")
            .with_query("a", "1");
        assert_eq!(req.method, HttpMethod::Post);
        assert!(req.absolute_path);
        assert_eq!(req.query.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
