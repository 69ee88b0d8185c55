//! Exchange/queue topology derived from `ConsumerConfig`

use crate::broker::BrokerChannel;
use crate::config::ConsumerConfig;
use crate::error::QueueError;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Topic,
    Fanout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeType,
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    /// `x-message-ttl`
    pub message_ttl_ms: Option<u32>,
    /// `x-max-length`
    pub max_length: Option<u32>,
    /// `x-dead-letter-exchange`
    pub dead_letter_exchange: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Fanout DLX plus the queue that collects rejected messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterTopology {
    pub exchange: ExchangeSpec,
    pub queue: QueueSpec,
    pub binding: BindingSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: ExchangeSpec,
    pub queue: QueueSpec,
    pub binding: BindingSpec,
    pub dead_letter: Option<DeadLetterTopology>,
}

impl Topology {
    pub fn from_config(config: &ConsumerConfig) -> Self {
        let dead_letter = config.dead_letter_exchange.as_ref().map(|dlx| {
            let queue = format!("{}.dead", config.queue);
            DeadLetterTopology {
                exchange: ExchangeSpec {
                    name: dlx.clone(),
                    kind: ExchangeType::Fanout,
                    durable: true,
                },
                queue: QueueSpec {
                    name: queue.clone(),
                    durable: true,
                    message_ttl_ms: None,
                    max_length: None,
                    dead_letter_exchange: None,
                },
                binding: BindingSpec {
                    queue,
                    exchange: dlx.clone(),
                    routing_key: String::new(),
                },
            }
        });

        Self {
            exchange: ExchangeSpec {
                name: config.exchange.clone(),
                kind: ExchangeType::Topic,
                durable: true,
            },
            queue: QueueSpec {
                name: config.queue.clone(),
                durable: true,
                message_ttl_ms: Some(config.message_ttl_ms),
                max_length: Some(config.max_length),
                dead_letter_exchange: config.dead_letter_exchange.clone(),
            },
            binding: BindingSpec {
                queue: config.queue.clone(),
                exchange: config.exchange.clone(),
                routing_key: config.routing_pattern.clone(),
            },
            dead_letter,
        }
    }

    /// Declare everything on `channel`. The DLX goes first so the main queue
    /// can reference it.
    pub async fn declare(&self, channel: &dyn BrokerChannel) -> Result<(), QueueError> {
        if let Some(dead_letter) = &self.dead_letter {
            channel.declare_exchange(&dead_letter.exchange).await?;
            channel.declare_queue(&dead_letter.queue).await?;
            channel.bind_queue(&dead_letter.binding).await?;
            debug!(
                exchange = %dead_letter.exchange.name,
                queue = %dead_letter.queue.name,
                "Dead-letter topology declared"
            );
        }

        channel.declare_exchange(&self.exchange).await?;
        channel.declare_queue(&self.queue).await?;
        channel.bind_queue(&self.binding).await?;

        debug!(
            exchange = %self.exchange.name,
            queue = %self.queue.name,
            routing_key = %self.binding.routing_key,
            "Queue bound to exchange"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology() {
        let topology = Topology::from_config(&ConsumerConfig::default());

        assert_eq!(topology.exchange.kind, ExchangeType::Topic);
        assert!(topology.exchange.durable);
        assert!(topology.queue.durable);
        assert_eq!(topology.queue.message_ttl_ms, Some(86_400_000));
        assert_eq!(topology.queue.max_length, Some(10_000));
        assert_eq!(topology.queue.dead_letter_exchange, None);
        assert_eq!(topology.binding.routing_key, "email.*");
        assert_eq!(topology.binding.exchange, "email_exchange");
        assert!(topology.dead_letter.is_none());
    }

    #[test]
    fn test_dead_letter_topology() {
        let config = ConsumerConfig::default().with_dead_letter_exchange(Some("email_dlx".into()));
        let topology = Topology::from_config(&config);

        assert_eq!(topology.queue.dead_letter_exchange.as_deref(), Some("email_dlx"));
        let dead_letter = topology.dead_letter.unwrap();
        assert_eq!(dead_letter.exchange.kind, ExchangeType::Fanout);
        assert_eq!(dead_letter.queue.name, "email_queue.dead");
        assert_eq!(dead_letter.binding.exchange, "email_dlx");
    }
}
