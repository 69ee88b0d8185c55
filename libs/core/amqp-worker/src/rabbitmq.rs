//! RabbitMQ adapter for the broker traits, built on `lapin`
//! (AMQP 0.9.1).

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::debug;

use crate::broker::{
    Acker, BrokerChannel, BrokerConnection, BrokerConnector, ConnectionEvent, ConnectionListener,
    Delivery, DeliveryStream, InboundMessage, OutboundMessage, RETRY_COUNT_HEADER,
};
use crate::error::QueueError;
use crate::topology::{BindingSpec, ExchangeSpec, ExchangeType, QueueSpec};

/// Opens lapin connections to a single broker URL
#[derive(Debug, Clone)]
pub struct LapinConnector {
    url: String,
    connection_name: String,
}

impl LapinConnector {
    pub fn new(url: impl Into<String>, connection_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_name: connection_name.into(),
        }
    }
}

#[async_trait]
impl BrokerConnector for LapinConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, QueueError> {
        let connection = Connection::connect(
            &self.url,
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into()),
        )
        .await
        .map_err(|e| QueueError::Connection(format!("RabbitMQ connection failed: {}", e)))?;

        Ok(Box::new(LapinConnection { connection }))
    }
}

pub struct LapinConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, QueueError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(format!("RabbitMQ channel creation failed: {}", e)))?;

        // publisher confirms, so a republished retry is only acked once the
        // broker has taken the copy
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| QueueError::Connection(format!("Enabling publisher confirms failed: {}", e)))?;

        Ok(Arc::new(LapinChannel { channel }))
    }

    fn subscribe(&self, listener: ConnectionListener) {
        // lapin reports every abnormal termination through on_error; the
        // connection is unusable afterwards.
        self.connection.on_error(move |err| {
            let reason = err.to_string();
            listener(ConnectionEvent::Error(reason.clone()));
            listener(ConnectionEvent::Closed(Some(reason)));
        });
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.connection
            .close(200, "OK")
            .await
            .map_err(|e| QueueError::Connection(format!("RabbitMQ connection close failed: {}", e)))
    }
}

pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), QueueError> {
        let kind = match spec.kind {
            ExchangeType::Topic => ExchangeKind::Topic,
            ExchangeType::Fanout => ExchangeKind::Fanout,
        };

        self.channel
            .exchange_declare(
                &spec.name,
                kind,
                ExchangeDeclareOptions {
                    durable: spec.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                QueueError::Topology(format!("Exchange '{}' declaration failed: {}", spec.name, e))
            })
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), QueueError> {
        self.channel
            .queue_declare(
                &spec.name,
                QueueDeclareOptions {
                    durable: spec.durable,
                    ..Default::default()
                },
                queue_arguments(spec),
            )
            .await
            .map(|_| ())
            .map_err(|e| {
                QueueError::Topology(format!("Queue '{}' declaration failed: {}", spec.name, e))
            })
    }

    async fn bind_queue(&self, spec: &BindingSpec) -> Result<(), QueueError> {
        self.channel
            .queue_bind(
                &spec.queue,
                &spec.exchange,
                &spec.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                QueueError::Topology(format!(
                    "Binding '{}' -> '{}' failed: {}",
                    spec.queue, spec.exchange, e
                ))
            })
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), QueueError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Topology(format!("Failed to set QoS: {}", e)))
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, QueueError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Topology(format!("basic_consume failed: {}", e)))?;

        debug!(queue, consumer_tag, "Registered consumer");

        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(into_delivery)
                    .map_err(|e| QueueError::Connection(format!("Delivery stream failed: {}", e)))
            })
            .boxed())
    }

    async fn publish(&self, exchange: &str, message: &OutboundMessage) -> Result<(), QueueError> {
        let mut headers = FieldTable::default();
        headers.insert(
            RETRY_COUNT_HEADER.into(),
            AMQPValue::LongLongInt(i64::from(message.retry_count)),
        );

        let mut properties = BasicProperties::default()
            .with_headers(headers)
            .with_delivery_mode(2) // Persistent
            .with_content_type("application/json".into());
        if let Some(id) = &message.message_id {
            properties = properties.with_message_id(id.clone().into());
        }

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                &message.routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &message.body,
                properties,
            )
            .await
            .map_err(|e| QueueError::Publish(format!("Publish failed: {}", e)))?;

        let confirmation = confirm
            .await
            .map_err(|e| QueueError::Publish(format!("Publish confirmation failed: {}", e)))?;
        confirmation_result(exchange, confirmation)
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.channel
            .close(200, "OK")
            .await
            .map_err(|e| QueueError::Connection(format!("RabbitMQ channel close failed: {}", e)))
    }
}

struct LapinAcker(lapin::acker::Acker);

#[async_trait]
impl Acker for LapinAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Acknowledgement(format!("ack failed: {}", e)))
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::Acknowledgement(format!("nack failed: {}", e)))
    }
}

/// Only a plain broker ack counts as published. A returned (unroutable)
/// message, a nack, or a channel without confirms all fail.
fn confirmation_result(exchange: &str, confirmation: Confirmation) -> Result<(), QueueError> {
    match confirmation {
        Confirmation::Ack(None) => Ok(()),
        Confirmation::Ack(Some(_)) => Err(QueueError::Publish(format!(
            "Message returned as unroutable by exchange '{}'",
            exchange
        ))),
        Confirmation::Nack(_) => Err(QueueError::Publish(format!(
            "Broker rejected publish to '{}'",
            exchange
        ))),
        Confirmation::NotRequested => Err(QueueError::Publish(
            "Publisher confirms are not enabled on the channel".to_string(),
        )),
    }
}

fn queue_arguments(spec: &QueueSpec) -> FieldTable {
    let mut args = FieldTable::default();
    if let Some(ttl) = spec.message_ttl_ms {
        args.insert("x-message-ttl".into(), AMQPValue::LongLongInt(i64::from(ttl)));
    }
    if let Some(max_length) = spec.max_length {
        args.insert("x-max-length".into(), AMQPValue::LongLongInt(i64::from(max_length)));
    }
    if let Some(dlx) = &spec.dead_letter_exchange {
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(dlx.as_str().into()),
        );
    }
    args
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let retry_count = retry_count_from_headers(delivery.properties.headers());
    let message_id = delivery
        .properties
        .message_id()
        .as_ref()
        .map(|id| id.as_str().to_string());

    let message = InboundMessage {
        routing_key: delivery.routing_key.as_str().to_string(),
        redelivered: delivery.redelivered,
        message_id,
        retry_count,
        body: delivery.data,
    };

    Delivery::new(message, Box::new(LapinAcker(delivery.acker)))
}

/// Read `x-retry-count`; absent, negative or non-numeric values count as 0.
pub fn retry_count_from_headers(headers: &Option<FieldTable>) -> u32 {
    headers
        .as_ref()
        .and_then(|table| {
            table
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
                .map(|(_, value)| value)
        })
        .and_then(retry_count_from_value)
        .unwrap_or(0)
}

fn retry_count_from_value(value: &AMQPValue) -> Option<u32> {
    let n: i64 = match value {
        AMQPValue::ShortShortInt(v) => i64::from(*v),
        AMQPValue::ShortShortUInt(v) => i64::from(*v),
        AMQPValue::ShortInt(v) => i64::from(*v),
        AMQPValue::ShortUInt(v) => i64::from(*v),
        AMQPValue::LongInt(v) => i64::from(*v),
        AMQPValue::LongUInt(v) => i64::from(*v),
        AMQPValue::LongLongInt(v) => *v,
        AMQPValue::ShortString(s) => s.as_str().trim().parse().ok()?,
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(n).ok()
}
