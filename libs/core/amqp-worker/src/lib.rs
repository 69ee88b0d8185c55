//! AMQP Worker Framework
//!
//! A RabbitMQ queue consumer for processing messages with at-least-once
//! semantics.
//!
//! ## Features
//!
//! - **Manual acknowledgement**: ack on success, nack on failure
//! - **Bounded retry**: requeue while `x-retry-count < MAX_RETRIES`, then
//!   reject without requeue (dead-letter)
//! - **Prefetch 1**: one delivery in flight per consumer
//! - **Reconnection**: fixed-delay retries up to `MAX_RECONNECT_ATTEMPTS`
//! - **Lifecycle events**: broadcast channel of state changes and outcomes
//! - **Prometheus metrics** and **health endpoints**
//!
//! ## Example
//!
//! ```ignore
//! use amqp_worker::{ConsumerConfig, DeliveryHandler, LapinConnector, QueueConsumer};
//!
//! let connector = Arc::new(LapinConnector::new("amqp://localhost:5672", "email-worker"));
//! let consumer = QueueConsumer::new(connector, MyHandler, ConsumerConfig::default());
//!
//! consumer.start().await?;
//! shutdown_signal().await;
//! consumer.stop().await?;
//! ```

mod broker;
mod config;
mod consumer;
mod error;
mod event;
mod handler;
mod health;
pub mod metrics;
mod rabbitmq;
mod retry;
mod topology;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types
pub use broker::{
    Acker, BrokerChannel, BrokerConnection, BrokerConnector, ConnectionEvent, ConnectionListener,
    Delivery, DeliveryStream, InboundMessage, OutboundMessage, RETRY_COUNT_HEADER,
};
pub use config::{
    ConsumerConfig, DEFAULT_MAX_LENGTH, DEFAULT_MESSAGE_TTL_MS, DEFAULT_ROUTING_PATTERN,
    MAX_RECONNECT_ATTEMPTS, MAX_RETRIES, PREFETCH_COUNT, RECONNECT_DELAY,
};
pub use consumer::QueueConsumer;
pub use error::{HandlerError, QueueError};
pub use event::{ConnectionState, ConsumerPhase, LifecycleEvent, StatusHandle};
pub use handler::DeliveryHandler;
pub use health::{HealthState, health_router};
pub use metrics::{ConsumerMetrics, init_metrics};
pub use rabbitmq::{LapinChannel, LapinConnection, LapinConnector, retry_count_from_headers};
pub use retry::{RequeueMode, RetryDecision, RetryPolicy};
pub use topology::{BindingSpec, DeadLetterTopology, ExchangeSpec, ExchangeType, QueueSpec, Topology};
