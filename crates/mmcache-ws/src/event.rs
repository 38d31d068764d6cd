//! Events delivered to subscription callbacks.

use serde::Serialize;
use serde_json::Value;

/// One callback invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    /// A decoded change event.
    Message(Value),
    /// The connection failed; another attempt is scheduled.
    Retry { attempt: u32, message: String },
    /// The retry budget is spent. Nothing else will be delivered.
    Exhausted { message: String },
}

impl SubscriptionEvent {
    /// `true` for retry and exhaustion notifications.
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Message(_))
    }

    /// For error events, whether the client will try again.
    pub fn retry(&self) -> Option<bool> {
        match self {
            Self::Message(_) => None,
            Self::Retry { .. } => Some(true),
            Self::Exhausted { .. } => Some(false),
        }
    }

    /// `true` if no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_flags() {
        let msg = SubscriptionEvent::Message(json!({"k": 1}));
        let retry = SubscriptionEvent::Retry {
            attempt: 1,
            message: "closed".into(),
        };
        let done = SubscriptionEvent::Exhausted { message: "gave up".into() };

        assert!(!msg.is_error());
        assert_eq!(msg.retry(), None);
        assert!(retry.is_error());
        assert_eq!(retry.retry(), Some(true));
        assert_eq!(done.retry(), Some(false));
        assert!(done.is_terminal() && !retry.is_terminal());
    }

    #[test]
    fn serializes_tagged() {
        let retry = SubscriptionEvent::Retry {
            attempt: 2,
            message: "reset".into(),
        };
        assert_eq!(
            serde_json::to_value(&retry).unwrap(),
            json!({"type": "retry", "data": {"attempt": 2, "message": "reset"}})
        );
    }
}
