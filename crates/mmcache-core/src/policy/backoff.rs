//! Exponential backoff scheduler with an attempt budget and optional jitter.
//!
//! One [`Backoff`] instance belongs to exactly one logical operation (one
//! `subscribe` call). It counts attempts, which only ever go up, and turns
//! terminal once the budget is spent.

use std::time::Duration;

use rand::Rng;

use crate::error::CacheError;

/// Upper bound for any computed delay, used when `max_delay` is unbounded so
/// that large exponents saturate instead of overflowing `Duration`.
pub const DELAY_CEILING: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration for the backoff scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Number of retries allowed after the initial attempt.
    pub retries: u32,
    /// Multiplier applied to the delay on each retry. Must be `>= 1`.
    pub factor: f64,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Cap on the delay. `None` = unbounded.
    pub max_delay: Option<Duration>,
    /// Multiply each delay by a random factor in `[1, 2)` before capping.
    pub randomize: bool,
    /// Never run out of retries.
    pub forever: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            retries: 10,
            factor: 2.0,
            min_delay: Duration::from_secs(1),
            max_delay: None,
            randomize: false,
            forever: false,
        }
    }
}

impl BackoffConfig {
    /// Reject configurations that would make delays shrink or go NaN.
    pub fn validate(&self) -> Result<(), CacheError> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(CacheError::Configuration(format!(
                "backoff factor must be a finite number >= 1, got {}",
                self.factor
            )));
        }
        if let Some(max) = self.max_delay {
            if max < self.min_delay {
                return Err(CacheError::Configuration(format!(
                    "max delay {max:?} is below min delay {:?}",
                    self.min_delay
                )));
            }
        }
        Ok(())
    }
}

/// Stateful retry scheduler for a single operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
    exhausted: bool,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self {
            config,
            attempts: 0,
            exhausted: false,
        })
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Number of retries granted so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns `true` once `should_retry` has refused a retry.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Ask for permission to retry.
    ///
    /// Grants the retry and bumps the attempt counter while budget remains
    /// (always, with `forever`). Once refused, every later call refuses too.
    pub fn should_retry(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        if !self.config.forever && self.attempts >= self.config.retries {
            self.exhausted = true;
            tracing::debug!(attempts = self.attempts, "retry budget exhausted");
            return false;
        }
        self.attempts = self.attempts.saturating_add(1);
        true
    }

    /// Delay before the `attempt`-th retry (1-based), jittered if configured.
    ///
    /// With `forever`, attempts beyond `retries` wait as long as attempt
    /// `retries` did.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::thread_rng())
    }

    /// Same as [`Backoff::next_delay`] with a caller-provided RNG.
    pub fn next_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter = if self.config.randomize {
            rng.gen_range(1.0..2.0)
        } else {
            1.0
        };
        self.compute(attempt, jitter)
    }

    /// Non-jittered delay for `attempt`; the lower bound of the jittered one.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.compute(attempt, 1.0)
    }

    fn compute(&self, attempt: u32, jitter: f64) -> Duration {
        // Past the budget, `forever` keeps reusing the last budgeted delay.
        let attempt = if self.config.forever {
            attempt.min(self.config.retries.max(1))
        } else {
            attempt
        };
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw_ns =
            self.config.min_delay.as_nanos() as f64 * self.config.factor.powi(exponent) * jitter;
        let cap = self
            .config
            .max_delay
            .unwrap_or(DELAY_CEILING)
            .min(DELAY_CEILING);

        if !raw_ns.is_finite() || raw_ns >= cap.as_nanos() as f64 {
            cap
        } else {
            Duration::from_nanos(raw_ns as u64)
        }
    }
}
