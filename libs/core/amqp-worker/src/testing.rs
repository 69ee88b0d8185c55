//! In-memory broker for exercising the consumer without RabbitMQ.
//!
//! Requeue semantics follow a broker with a retry-incrementing republish
//! step: `nack(requeue = true)` puts the message back with
//! `retry_count + 1` and `redelivered = true`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::broker::{
    Acker, BrokerChannel, BrokerConnection, BrokerConnector, ConnectionEvent, ConnectionListener,
    Delivery, DeliveryStream, InboundMessage, OutboundMessage,
};
use crate::error::QueueError;
use crate::topology::{BindingSpec, ExchangeSpec, QueueSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Ack,
    Nack { requeue: bool },
}

/// One settled delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub message_id: Option<String>,
    pub retry_count: u32,
    pub kind: AckKind,
}

/// Topology and QoS calls, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyOp {
    Exchange(ExchangeSpec),
    Queue(QueueSpec),
    Bind(BindingSpec),
    Prefetch(u16),
}

struct Shared {
    connect_calls: usize,
    connect_delay: Duration,
    fail_next: usize,
    always_fail: bool,
    fail_publishes: bool,
    redeliver_on_requeue: bool,
    backlog: VecDeque<InboundMessage>,
    sender: Option<mpsc::UnboundedSender<InboundMessage>>,
    listeners: Vec<ConnectionListener>,
    acks: Vec<AckRecord>,
    published: Vec<OutboundMessage>,
    topology: Vec<TopologyOp>,
    closes: Vec<&'static str>,
    history: Vec<&'static str>,
    outstanding: usize,
    max_outstanding: usize,
}

impl Shared {
    fn enqueue(&mut self, message: InboundMessage) {
        match &self.sender {
            Some(sender) => {
                if let Err(mpsc::error::SendError(message)) = sender.send(message) {
                    self.backlog.push_back(message);
                }
            }
            None => self.backlog.push_back(message),
        }
    }
}

/// Shared handle; clones observe the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Mutex<Shared>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                connect_calls: 0,
                connect_delay: Duration::ZERO,
                fail_next: 0,
                always_fail: false,
                fail_publishes: false,
                redeliver_on_requeue: true,
                backlog: VecDeque::new(),
                sender: None,
                listeners: Vec::new(),
                acks: Vec::new(),
                published: Vec::new(),
                topology: Vec::new(),
                closes: Vec::new(),
                history: Vec::new(),
                outstanding: 0,
                max_outstanding: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` connection attempts
    pub fn fail_next_connects(&self, n: usize) {
        self.lock().fail_next = n;
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.lock().always_fail = fail;
    }

    /// Delay every connection attempt before it succeeds or fails
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    /// Reject publishes as an unconfirmed broker would
    pub fn set_fail_publishes(&self, fail: bool) {
        self.lock().fail_publishes = fail;
    }

    /// When disabled, requeued messages are recorded but not redelivered
    pub fn set_redeliver_on_requeue(&self, redeliver: bool) {
        self.lock().redeliver_on_requeue = redeliver;
    }

    /// Queue a message for delivery
    pub fn publish(&self, message: InboundMessage) {
        self.lock().enqueue(message);
    }

    /// Simulate the broker dropping the connection
    pub fn drop_connection(&self) {
        let listeners = {
            let mut shared = self.lock();
            shared.sender = None;
            std::mem::take(&mut shared.listeners)
        };
        for listener in &listeners {
            listener(ConnectionEvent::Closed(Some("connection reset by broker".to_string())));
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    pub fn acks(&self) -> Vec<AckRecord> {
        self.lock().acks.clone()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.lock().published.clone()
    }

    pub fn topology(&self) -> Vec<TopologyOp> {
        self.lock().topology.clone()
    }

    /// `"channel"` / `"connection"` in the order they were closed
    pub fn closes(&self) -> Vec<&'static str> {
        self.lock().closes.clone()
    }

    /// Highest number of simultaneously unsettled deliveries
    pub fn max_outstanding(&self) -> usize {
        self.lock().max_outstanding
    }

    /// Settlements and closes interleaved in the order they happened:
    /// `"ack"`, `"nack"`, `"channel"`, `"connection"`
    pub fn history(&self) -> Vec<&'static str> {
        self.lock().history.clone()
    }

    /// Poll until `n` deliveries have been settled
    pub async fn wait_for_acks(&self, n: usize, timeout: Duration) -> Vec<AckRecord> {
        self.wait_until(timeout, |b| b.acks().len() >= n).await;
        self.acks()
    }

    /// Poll until `condition` holds or `timeout` expires; returns whether it held.
    pub async fn wait_until(&self, timeout: Duration, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, QueueError> {
        let delay = {
            let mut shared = self.lock();
            shared.connect_calls += 1;
            shared.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut shared = self.lock();
        if shared.always_fail {
            return Err(QueueError::Connection("connection refused".to_string()));
        }
        if shared.fail_next > 0 {
            shared.fail_next -= 1;
            return Err(QueueError::Connection("connection refused".to_string()));
        }
        shared.listeners.clear();

        Ok(Box::new(MemoryConnection {
            broker: self.clone(),
        }))
    }
}

struct MemoryConnection {
    broker: InMemoryBroker,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, QueueError> {
        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
        }))
    }

    fn subscribe(&self, listener: ConnectionListener) {
        self.broker.lock().listeners.push(listener);
    }

    async fn close(&self) -> Result<(), QueueError> {
        let mut shared = self.broker.lock();
        shared.closes.push("connection");
        shared.history.push("connection");
        shared.sender = None;
        shared.listeners.clear();
        Ok(())
    }
}

struct MemoryChannel {
    broker: InMemoryBroker,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), QueueError> {
        self.broker.lock().topology.push(TopologyOp::Exchange(spec.clone()));
        Ok(())
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), QueueError> {
        self.broker.lock().topology.push(TopologyOp::Queue(spec.clone()));
        Ok(())
    }

    async fn bind_queue(&self, spec: &BindingSpec) -> Result<(), QueueError> {
        self.broker.lock().topology.push(TopologyOp::Bind(spec.clone()));
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), QueueError> {
        self.broker.lock().topology.push(TopologyOp::Prefetch(count));
        Ok(())
    }

    async fn consume(&self, _queue: &str, _consumer_tag: &str) -> Result<DeliveryStream, QueueError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut shared = self.broker.lock();
            while let Some(message) = shared.backlog.pop_front() {
                let _ = tx.send(message);
            }
            shared.sender = Some(tx);
        }

        let broker = self.broker.clone();
        let stream = UnboundedReceiverStream::new(rx).map(move |message| {
            {
                let mut shared = broker.lock();
                shared.outstanding += 1;
                shared.max_outstanding = shared.max_outstanding.max(shared.outstanding);
            }
            Ok(Delivery::new(
                message.clone(),
                Box::new(MemoryAcker {
                    broker: broker.clone(),
                    message,
                }),
            ))
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, _exchange: &str, message: &OutboundMessage) -> Result<(), QueueError> {
        let mut shared = self.broker.lock();
        if shared.fail_publishes {
            return Err(QueueError::Publish("publish not confirmed by broker".to_string()));
        }
        shared.published.push(message.clone());
        shared.enqueue(InboundMessage {
            body: message.body.clone(),
            message_id: message.message_id.clone(),
            routing_key: message.routing_key.clone(),
            retry_count: message.retry_count,
            redelivered: false,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        let mut shared = self.broker.lock();
        shared.closes.push("channel");
        shared.history.push("channel");
        shared.sender = None;
        Ok(())
    }
}

struct MemoryAcker {
    broker: InMemoryBroker,
    message: InboundMessage,
}

impl MemoryAcker {
    fn settle(&self, kind: AckKind) {
        let mut shared = self.broker.lock();
        shared.outstanding = shared.outstanding.saturating_sub(1);
        shared.acks.push(AckRecord {
            message_id: self.message.message_id.clone(),
            retry_count: self.message.retry_count,
            kind,
        });
        shared.history.push(match kind {
            AckKind::Ack => "ack",
            AckKind::Nack { .. } => "nack",
        });

        if kind == (AckKind::Nack { requeue: true }) && shared.redeliver_on_requeue {
            let mut message = self.message.clone();
            message.retry_count = message.retry_count.saturating_add(1);
            message.redelivered = true;
            shared.enqueue(message);
        }
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.settle(AckKind::Ack);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.settle(AckKind::Nack { requeue });
        Ok(())
    }
}
