//! Consumer configuration
//!
//! This module provides `ConsumerConfig` and the fixed reliability constants.

use crate::retry::RequeueMode;
use std::time::Duration;
use uuid::Uuid;

/// Failed deliveries are requeued while `x-retry-count < MAX_RETRIES`
pub const MAX_RETRIES: u32 = 3;

/// Consecutive failed connection attempts before reconnection is abandoned
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Fixed delay between reconnection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// One unacknowledged delivery at a time
pub const PREFETCH_COUNT: u16 = 1;

pub const DEFAULT_MESSAGE_TTL_MS: u32 = 86_400_000;
pub const DEFAULT_MAX_LENGTH: u32 = 10_000;
pub const DEFAULT_ROUTING_PATTERN: &str = "email.*";

/// Configuration for the queue consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Durable queue name
    pub queue: String,

    /// Durable topic exchange name
    pub exchange: String,

    /// Binding pattern (e.g. `email.*`)
    pub routing_pattern: String,

    /// Consumer tag (auto-generated if not provided)
    pub consumer_tag: String,

    /// `x-message-ttl` queue argument
    pub message_ttl_ms: u32,

    /// `x-max-length` queue argument
    pub max_length: u32,

    /// Retry ceiling for failed deliveries
    pub max_retries: u32,

    /// Reconnection ceiling
    pub max_reconnect_attempts: u32,

    /// Delay between reconnection attempts
    pub reconnect_delay: Duration,

    /// Optional dead-letter exchange; a `<queue>.dead` queue is bound to it
    pub dead_letter_exchange: Option<String>,

    /// How requeues are carried out
    pub requeue_mode: RequeueMode,
}

impl ConsumerConfig {
    /// Create a new ConsumerConfig with the default reliability settings
    pub fn new(queue: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_pattern: DEFAULT_ROUTING_PATTERN.to_string(),
            consumer_tag: format!("email-worker-{}", Uuid::new_v4()),
            message_ttl_ms: DEFAULT_MESSAGE_TTL_MS,
            max_length: DEFAULT_MAX_LENGTH,
            max_retries: MAX_RETRIES,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: RECONNECT_DELAY,
            dead_letter_exchange: None,
            requeue_mode: RequeueMode::Nack,
        }
    }

    pub fn with_routing_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.routing_pattern = pattern.into();
        self
    }

    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    pub fn with_message_ttl_ms(mut self, ttl: u32) -> Self {
        self.message_ttl_ms = ttl;
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the reconnection ceiling (at least 1)
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts.max(1);
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_dead_letter_exchange(mut self, exchange: Option<String>) -> Self {
        self.dead_letter_exchange = exchange;
        self
    }

    pub fn with_requeue_mode(mut self, mode: RequeueMode) -> Self {
        self.requeue_mode = mode;
        self
    }

    /// Queue bound to the dead-letter exchange, if one is configured
    pub fn dead_letter_queue(&self) -> Option<String> {
        self.dead_letter_exchange
            .as_ref()
            .map(|_| format!("{}.dead", self.queue))
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::new("email_queue", "email_exchange")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::default();

        assert_eq!(config.queue, "email_queue");
        assert_eq!(config.exchange, "email_exchange");
        assert_eq!(config.routing_pattern, "email.*");
        assert_eq!(config.message_ttl_ms, 86_400_000);
        assert_eq!(config.max_length, 10_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.requeue_mode, RequeueMode::Nack);
        assert!(config.consumer_tag.starts_with("email-worker-"));
        assert_eq!(config.dead_letter_queue(), None);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ConsumerConfig::new("mail", "mail.topic")
            .with_routing_pattern("mail.#")
            .with_consumer_tag("worker-1")
            .with_max_reconnect_attempts(0)
            .with_reconnect_delay(Duration::from_millis(10))
            .with_dead_letter_exchange(Some("mail.dlx".to_string()))
            .with_requeue_mode(RequeueMode::Republish);

        assert_eq!(config.routing_pattern, "mail.#");
        assert_eq!(config.consumer_tag, "worker-1");
        assert_eq!(config.max_reconnect_attempts, 1);
        assert_eq!(config.reconnect_delay, Duration::from_millis(10));
        assert_eq!(config.dead_letter_queue().as_deref(), Some("mail.dead"));
        assert_eq!(config.requeue_mode, RequeueMode::Republish);
    }
}
