//! Per-subscription options.

use std::collections::BTreeMap;
use std::time::Duration;

use mmcache_core::error::CacheError;
use mmcache_core::policy::BackoffConfig;

use crate::endpoint::validate_host;

/// Options accepted by [`crate::Supervisor::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeOptions {
    /// Open a second (producer) connection and send heartbeats on it.
    pub keep_alive: bool,
    /// Period between heartbeats.
    pub heartbeat_interval: Duration,
    /// Reconnects allowed after the initial attempt.
    pub retries: u32,
    /// Backoff multiplier.
    pub factor: f64,
    /// Delay before the first reconnect.
    pub min_delay: Duration,
    /// Cap on the reconnect delay. `None` = unbounded.
    pub max_delay: Option<Duration>,
    /// Jitter reconnect delays by a factor in `[1, 2)`.
    pub randomize: bool,
    /// Reconnect forever, ignoring `retries`.
    pub forever: bool,
    /// Connect to this host instead of resolving the local edge location.
    pub edge_host: Option<String>,
    /// Extra query parameters for the consumer URL (e.g. `subscriptionType`).
    pub query: BTreeMap<String, String>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            keep_alive: false,
            heartbeat_interval: Duration::from_secs(30),
            retries: 10,
            factor: 2.0,
            min_delay: Duration::from_secs(1),
            max_delay: None,
            randomize: false,
            forever: false,
            edge_host: None,
            query: BTreeMap::new(),
        }
    }
}

impl SubscribeOptions {
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = true;
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, min_delay: Duration, factor: f64) -> Self {
        self.min_delay = min_delay;
        self.factor = factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    pub fn with_forever(mut self, forever: bool) -> Self {
        self.forever = forever;
        self
    }

    pub fn with_edge_host(mut self, host: impl Into<String>) -> Self {
        self.edge_host = Some(host.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            retries: self.retries,
            factor: self.factor,
            min_delay: self.min_delay,
            max_delay: self.max_delay,
            randomize: self.randomize,
            forever: self.forever,
        }
    }

    /// Checks that can fail before any I/O.
    pub fn validate(&self) -> Result<(), CacheError> {
        if let Some(host) = &self.edge_host {
            validate_host(host)?;
        }
        if self.keep_alive && self.heartbeat_interval.is_zero() {
            return Err(CacheError::Configuration(
                "heartbeat interval must be greater than zero".into(),
            ));
        }
        self.backoff_config().validate()
    }
}
