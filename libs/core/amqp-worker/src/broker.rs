//! Narrow broker interface
//!
//! The consumer only talks to a broker through these traits, so the state
//! machine can be driven by the lapin adapter in production and by the
//! in-memory broker in tests.

use crate::error::QueueError;
use crate::topology::{BindingSpec, ExchangeSpec, QueueSpec};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Header carrying the delivery attempt counter
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

pub type DeliveryStream = BoxStream<'static, Result<Delivery, QueueError>>;

/// Callback registered through [`BrokerConnection::subscribe`]
pub type ConnectionListener = Box<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Asynchronous connection notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Error(String),
    Closed(Option<String>),
}

/// A message as handed to the [`DeliveryHandler`](crate::DeliveryHandler)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub body: Vec<u8>,
    pub message_id: Option<String>,
    pub routing_key: String,
    /// From the `x-retry-count` header, 0 when absent
    pub retry_count: u32,
    pub redelivered: bool,
}

impl InboundMessage {
    pub fn new(routing_key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            routing_key: routing_key.into(),
            ..Default::default()
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Copy to publish for the next attempt
    pub fn next_attempt(&self) -> OutboundMessage {
        OutboundMessage {
            routing_key: self.routing_key.clone(),
            body: self.body.clone(),
            message_id: self.message_id.clone(),
            retry_count: self.retry_count.saturating_add(1),
        }
    }
}

/// A message to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub message_id: Option<String>,
    pub retry_count: u32,
}

/// Settles a single delivery
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<(), QueueError>;
    async fn nack(&self, requeue: bool) -> Result<(), QueueError>;
}

/// A delivered message together with the handle that settles it
pub struct Delivery {
    pub message: InboundMessage,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(message: InboundMessage, acker: Box<dyn Acker>) -> Self {
        Self { message, acker }
    }

    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), QueueError> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, QueueError>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, QueueError>;

    /// Register for error/close notifications
    fn subscribe(&self, listener: ConnectionListener);

    async fn close(&self) -> Result<(), QueueError>;
}

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), QueueError>;

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), QueueError>;

    async fn bind_queue(&self, spec: &BindingSpec) -> Result<(), QueueError>;

    async fn set_prefetch(&self, count: u16) -> Result<(), QueueError>;

    /// Start consuming with manual acknowledgement
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, QueueError>;

    async fn publish(&self, exchange: &str, message: &OutboundMessage) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_attempt_increments_retry_count() {
        let message = InboundMessage::new("email.notification", b"{}".to_vec())
            .with_message_id("m-1")
            .with_retry_count(2);

        let next = message.next_attempt();
        assert_eq!(next.retry_count, 3);
        assert_eq!(next.routing_key, "email.notification");
        assert_eq!(next.message_id.as_deref(), Some("m-1"));
        assert_eq!(next.body, b"{}".to_vec());
    }

    #[test]
    fn test_new_message_defaults() {
        let message = InboundMessage::new("email.warning", "x");
        assert_eq!(message.retry_count, 0);
        assert!(!message.redelivered);
        assert!(message.message_id.is_none());
    }
}
