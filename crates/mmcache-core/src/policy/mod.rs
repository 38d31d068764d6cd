//! Reconnect policy.
//!
//! ```text
//! session ends → Backoff::should_retry() → sleep(next_delay) → new session
//!                          └─ false → exhausted, operation terminates
//! ```

pub mod backoff;

pub use backoff::{Backoff, BackoffConfig, DELAY_CEILING};
