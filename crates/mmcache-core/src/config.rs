//! Client configuration.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Connection settings shared by the HTTP gateway and the stream client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Federation URL, e.g. `"https://gdn.paas.macrometa.io"`.
    pub url: String,
    /// API key sent as `authorization: apikey <key>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Fabric (database) the cache lives in.
    #[serde(default = "default_fabric")]
    pub fabric: String,
    /// Tenant used in stream URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Cache (collection) name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Extra headers added to every REST call.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout for REST calls, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Send every REST call to `url` as-is instead of the
    /// `https://api-<host>/_fabric/<fabric>` API.
    #[serde(default)]
    pub absolute_path: bool,
}

fn default_fabric() -> String { "_system".into() }
fn default_name() -> String { "mmcache".into() }
fn default_request_timeout_ms() -> u64 { 30_000 }

impl ClientConfig {
    /// Minimal config for `url` with every other field defaulted.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            fabric: default_fabric(),
            tenant: None,
            name: default_name(),
            headers: HashMap::new(),
            request_timeout_ms: default_request_timeout_ms(),
            absolute_path: false,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_fabric(mut self, fabric: impl Into<String>) -> Self {
        self.fabric = fabric.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Build from `MMCACHE_*` environment variables.
    ///
    /// `MMCACHE_URL` is required; `MMCACHE_API_KEY`, `MMCACHE_TENANT`,
    /// `MMCACHE_FABRIC` and `MMCACHE_NAME` are optional.
    pub fn from_env() -> Result<Self, CacheError> {
        let url = env::var("MMCACHE_URL")
            .map_err(|_| CacheError::Configuration("MMCACHE_URL is not set".into()))?;
        let mut config = Self::new(url);
        config.api_key = env::var("MMCACHE_API_KEY").ok();
        config.tenant = env::var("MMCACHE_TENANT").ok();
        if let Ok(fabric) = env::var("MMCACHE_FABRIC") {
            config.fabric = fabric;
        }
        if let Ok(name) = env::var("MMCACHE_NAME") {
            config.name = name;
        }
        Ok(config)
    }

    /// The stream target described by this config.
    pub fn target(&self) -> Result<SubscriptionTarget, CacheError> {
        let tenant = self
            .tenant
            .clone()
            .ok_or_else(|| CacheError::Configuration("tenant is not set".into()))?;
        let target = SubscriptionTarget {
            tenant,
            fabric: self.fabric.clone(),
            cache_name: self.name.clone(),
        };
        target.validate()?;
        Ok(target)
    }
}

/// Where a cache's change-feed lives: `<tenant>/c8local.<fabric>/<cache_name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionTarget {
    pub tenant: String,
    pub fabric: String,
    pub cache_name: String,
}

impl SubscriptionTarget {
    pub fn new(
        tenant: impl Into<String>,
        fabric: impl Into<String>,
        cache_name: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            fabric: fabric.into(),
            cache_name: cache_name.into(),
        }
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        for (field, value) in [
            ("tenant", &self.tenant),
            ("fabric", &self.fabric),
            ("cache name", &self.cache_name),
        ] {
            if value.trim().is_empty() {
                return Err(CacheError::Configuration(format!("{field} must not be empty")));
            }
            if value.contains('/') {
                return Err(CacheError::Configuration(format!(
                    "{field} must not contain '/': {value:?}"
                )));
            }
        }
        Ok(())
    }
}
