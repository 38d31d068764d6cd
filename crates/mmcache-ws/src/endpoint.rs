//! Stream URL construction.
//!
//! ```text
//! wss://<host>/_ws/ws/v2/consumer/persistent/<tenant>/c8local.<fabric>/<cache>/<sub>?otp=..
//! wss://<host>/_ws/ws/v2/producer/persistent/<tenant>/c8local.<fabric>/<cache>?otp=..
//! ```

use std::collections::BTreeMap;

use mmcache_core::config::SubscriptionTarget;
use mmcache_core::error::CacheError;
use mmcache_core::gateway::Credential;

const PERSISTENT: &str = "persistent";
const LOCAL_REGION: &str = "c8local";
const CREDENTIAL_PARAM: &str = "otp";

/// Which side of the stream a socket speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    /// Receives change events for a subscription.
    Consumer,
    /// Only used to emit heartbeats.
    Producer,
}

impl StreamRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::Consumer => "consumer",
            Self::Producer => "producer",
        }
    }
}

/// Reject anything that is not a bare host (optionally with a port).
///
/// `"https://gateway.example"` is the classic mistake: the caller passed a
/// URL where the edge host was expected.
pub fn validate_host(host: &str) -> Result<(), CacheError> {
    let lower = host.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return Err(CacheError::Configuration("edge host must not be empty".into()));
    }
    let has_scheme = lower.contains("://")
        || ["http:", "https:", "ws:", "wss:"]
            .iter()
            .any(|scheme| lower.starts_with(scheme));
    if has_scheme {
        return Err(CacheError::Configuration(format!(
            "invalid edge host {host:?}: expected a bare host, not a URL"
        )));
    }
    if lower.contains(|c: char| matches!(c, '/' | '?' | '#') || c.is_whitespace()) {
        return Err(CacheError::Configuration(format!(
            "invalid edge host {host:?}: unexpected path or query characters"
        )));
    }
    Ok(())
}

/// Build the URL for a stream socket.
///
/// `subscription` is required for consumers and ignored for producers.
/// Query keys are emitted in sorted order; the credential always travels as
/// `otp` and overrides any caller-supplied `otp`.
pub fn stream_url(
    role: StreamRole,
    host: &str,
    target: &SubscriptionTarget,
    subscription: Option<&str>,
    credential: &Credential,
    query: &BTreeMap<String, String>,
) -> Result<String, CacheError> {
    validate_host(host)?;
    target.validate()?;

    let mut url = format!(
        "wss://{host}/_ws/ws/v2/{role}/{PERSISTENT}/{tenant}/{LOCAL_REGION}.{fabric}/{cache}",
        host = host.trim(),
        role = role.as_str(),
        tenant = target.tenant,
        fabric = target.fabric,
        cache = target.cache_name,
    );

    if role == StreamRole::Consumer {
        let name = subscription
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| CacheError::Configuration("subscription name is required".into()))?;
        url.push('/');
        url.push_str(name);
    }

    let mut params = query.clone();
    params.insert(CREDENTIAL_PARAM.into(), credential.expose().to_string());
    let encoded = ::url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();
    url.push('?');
    url.push_str(&encoded);
    Ok(url)
}

/// Strip the query string so URLs can be logged without leaking credentials.
pub fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
