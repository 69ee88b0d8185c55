//! Consumer error types
//!
//! Two families:
//! - [`QueueError`]: broker and lifecycle failures. Connection-level errors are
//!   absorbed by the reconnection loop; only [`QueueError::NotInitialized`]
//!   escapes `start()`.
//! - [`HandlerError`]: per-message failures. Every variant resolves to an
//!   ack/nack decision and never stops the consumer.

use thiserror::Error;

/// Broker / consumer lifecycle errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Broker unreachable or connection dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// Exchange/queue declaration, binding or QoS failed
    #[error("Topology error: {0}")]
    Topology(String),

    /// ack/nack could not be delivered to the broker
    #[error("Acknowledgement error: {0}")]
    Acknowledgement(String),

    /// Publishing (republish-on-retry) failed
    #[error("Publish error: {0}")]
    Publish(String),

    /// Operation invoked on a connection/channel that does not exist yet
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// Invalid consumer configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Programming-invariant violations that are allowed to reach the caller.
    pub fn is_state_error(&self) -> bool {
        matches!(self, QueueError::NotInitialized(_))
    }

    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::Connection(_) => "connection",
            QueueError::Topology(_) => "topology",
            QueueError::Acknowledgement(_) => "acknowledgement",
            QueueError::Publish(_) => "publish",
            QueueError::NotInitialized(_) => "state",
            QueueError::Config(_) => "config",
        }
    }
}

/// Failure reported by a [`DeliveryHandler`](crate::DeliveryHandler)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Payload could not be decoded
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Payload decoded but processing failed
    #[error("Processing failed: {0}")]
    Failed(String),

    /// Handler panicked; caught at the delivery boundary
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn malformed(message: impl Into<String>) -> Self {
        HandlerError::Malformed(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Malformed(_) => "malformed",
            HandlerError::Failed(_) => "failed",
            HandlerError::Panicked(_) => "panicked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_state_errors_propagate() {
        assert!(QueueError::NotInitialized("channel").is_state_error());
        assert!(!QueueError::Connection("refused".into()).is_state_error());
        assert!(!QueueError::Topology("406".into()).is_state_error());
        assert!(!QueueError::Acknowledgement("closed".into()).is_state_error());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            QueueError::NotInitialized("channel").to_string(),
            "channel is not initialized"
        );
        assert_eq!(
            HandlerError::malformed("not json").to_string(),
            "Malformed message: not json"
        );
        assert_eq!(HandlerError::failed("smtp down").kind(), "failed");
    }
}
