//! Queue consumer state machine.
//!
//! `Stopped -> Connecting -> Binding -> Consuming -> (Stopped | Reconnecting)`
//!
//! - One dispatch task per live connection pulls deliveries one at a time and
//!   settles each before pulling the next (prefetch = 1).
//! - A single supervisor task owns reconnection: the dispatch task signals it
//!   when the connection goes away, and it retries with a fixed delay until
//!   the attempt ceiling is reached.
//! - `stop()` waits for the in-flight delivery, then closes channel and
//!   connection in that order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Instant;

use futures::{FutureExt, StreamExt};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::broker::{
    BrokerChannel, BrokerConnection, BrokerConnector, ConnectionEvent, Delivery, DeliveryStream,
};
use crate::config::{ConsumerConfig, PREFETCH_COUNT};
use crate::error::{HandlerError, QueueError};
use crate::event::{ConnectionState, ConsumerPhase, LifecycleEvent, StatusHandle};
use crate::handler::DeliveryHandler;
use crate::metrics::ConsumerMetrics;
use crate::retry::{RequeueMode, RetryDecision, RetryPolicy};
use crate::topology::Topology;

const EVENT_CAPACITY: usize = 64;

#[derive(Default)]
struct Session {
    connection: Option<Box<dyn BrokerConnection>>,
    channel: Option<Arc<dyn BrokerChannel>>,
}

struct Inner<H: DeliveryHandler> {
    connector: Arc<dyn BrokerConnector>,
    handler: Arc<H>,
    config: ConsumerConfig,
    topology: Topology,
    retry: RetryPolicy,
    status: StatusHandle,
    session: Mutex<Session>,
    /// Held for the whole handle/settle cycle of one delivery
    in_flight: Mutex<()>,
    shutdown: watch::Sender<bool>,
    reconnect_tx: mpsc::UnboundedSender<()>,
    reconnect_rx: StdMutex<Option<mpsc::UnboundedReceiver<()>>>,
    events: broadcast::Sender<LifecycleEvent>,
    metrics: ConsumerMetrics,
}

/// RabbitMQ queue consumer with manual acks, bounded retry and reconnection.
///
/// Cloning is cheap; clones drive the same consumer.
///
/// # Example
///
/// ```rust,ignore
/// let connector = Arc::new(LapinConnector::new(url, "email-worker"));
/// let consumer = QueueConsumer::new(connector, processor, ConsumerConfig::default());
/// consumer.start().await?;
/// // ...
/// consumer.stop().await?;
/// ```
pub struct QueueConsumer<H: DeliveryHandler + 'static> {
    inner: Arc<Inner<H>>,
}

impl<H: DeliveryHandler + 'static> Clone for QueueConsumer<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: DeliveryHandler + 'static> QueueConsumer<H> {
    pub fn new(connector: Arc<dyn BrokerConnector>, handler: H, config: ConsumerConfig) -> Self {
        Self::with_arc_handler(connector, Arc::new(handler), config)
    }

    pub fn with_arc_handler(
        connector: Arc<dyn BrokerConnector>,
        handler: Arc<H>,
        config: ConsumerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                connector,
                handler,
                topology: Topology::from_config(&config),
                retry: RetryPolicy::new(config.max_retries),
                metrics: ConsumerMetrics::new(config.queue.clone()),
                config,
                status: StatusHandle::default(),
                session: Mutex::new(Session::default()),
                in_flight: Mutex::new(()),
                shutdown,
                reconnect_tx,
                reconnect_rx: StdMutex::new(Some(reconnect_rx)),
                events,
            }),
        }
    }

    /// Connect, declare the topology and start consuming.
    ///
    /// Idempotent while the consumer is active. Broker failures are not
    /// returned: they move the consumer to `Reconnecting`. Only
    /// [`QueueError::NotInitialized`] reaches the caller.
    pub async fn start(&self) -> Result<(), QueueError> {
        let inner = &self.inner;

        let claimed = inner.status.update(|s| {
            if s.is_active() {
                false
            } else {
                s.phase = ConsumerPhase::Connecting;
                s.reconnect_attempts = 0;
                true
            }
        });
        if !claimed {
            warn!(queue = %inner.config.queue, "Consumer already running, ignoring start()");
            return Ok(());
        }

        inner.shutdown.send_replace(false);
        inner.ensure_supervisor();

        info!(
            queue = %inner.config.queue,
            exchange = %inner.config.exchange,
            routing_pattern = %inner.config.routing_pattern,
            handler = inner.handler.name(),
            "Starting queue consumer"
        );

        match inner.try_start().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_state_error() => {
                error!(error = %e, "Consumer start aborted");
                let _ = inner.release_session().await;
                inner.status.update(|s| {
                    s.is_running = false;
                    s.phase = ConsumerPhase::Stopped;
                });
                Err(e)
            }
            Err(e) => {
                let _ = inner.release_session().await;
                if inner.record_connect_failure().is_none() {
                    // stop() owns the transition to Stopped
                    debug!(error = %e, "Start attempt failed after stop()");
                    return Ok(());
                }
                error!(error = %e, "Failed to start consumer, scheduling reconnect");
                let _ = inner.reconnect_tx.send(());
                Ok(())
            }
        }
    }

    /// Stop consuming and release the channel and connection.
    ///
    /// Waits for the in-flight delivery to settle. Cancels a pending
    /// reconnect. No-op when already stopped.
    pub async fn stop(&self) -> Result<(), QueueError> {
        let inner = &self.inner;

        if inner.status.get().phase == ConsumerPhase::Stopped {
            debug!(queue = %inner.config.queue, "Consumer already stopped");
            return Ok(());
        }

        info!(queue = %inner.config.queue, "Stopping queue consumer");
        inner.shutdown.send_replace(true);

        let result = {
            let _in_flight = inner.in_flight.lock().await;
            inner.release_session().await
        };

        inner.status.update(|s| {
            s.is_running = false;
            s.phase = ConsumerPhase::Stopped;
        });
        inner.metrics.connected(false);
        inner.emit(LifecycleEvent::Stopped);
        info!(queue = %inner.config.queue, "Queue consumer stopped");

        result
    }

    /// Declare exchange, queue and binding on the current channel and set
    /// the prefetch.
    ///
    /// Fails with [`QueueError::NotInitialized`] before a connection exists.
    pub async fn setup_queue(&self) -> Result<(), QueueError> {
        self.inner.setup_queue().await
    }

    pub fn status(&self) -> ConnectionState {
        self.inner.status.get()
    }

    /// Shared status view (for health endpoints)
    pub fn status_handle(&self) -> StatusHandle {
        self.inner.status.clone()
    }

    /// Receive lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.inner.handler
    }
}

impl<H: DeliveryHandler + 'static> Inner<H> {
    fn emit(&self, event: LifecycleEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: ConsumerPhase) {
        self.status.update(|s| s.phase = phase);
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// A stop() that raced a connection attempt wins.
    fn mark_stopped_if_pending(&self) {
        self.status.update(|s| {
            if !s.is_running {
                s.phase = ConsumerPhase::Stopped;
            }
        });
    }

    fn ensure_supervisor(self: &Arc<Self>) {
        let rx = self
            .reconnect_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rx) = rx {
            tokio::spawn(supervise(Arc::downgrade(self), rx));
        }
    }

    async fn try_start(self: &Arc<Self>) -> Result<(), QueueError> {
        self.set_phase(ConsumerPhase::Connecting);
        let events = self.connect().await?;

        self.set_phase(ConsumerPhase::Binding);
        self.setup_queue().await?;

        let channel = self.channel().await?;
        let deliveries = channel
            .consume(&self.config.queue, &self.config.consumer_tag)
            .await?;

        if self.is_shutting_down() {
            let released = self.release_session().await;
            self.mark_stopped_if_pending();
            return released;
        }

        self.status.update(|s| {
            s.is_running = true;
            s.reconnect_attempts = 0;
            s.phase = ConsumerPhase::Consuming;
        });
        self.metrics.connected(true);

        tokio::spawn(dispatch(Arc::clone(self), channel, deliveries, events));

        info!(
            queue = %self.config.queue,
            consumer_tag = %self.config.consumer_tag,
            prefetch = PREFETCH_COUNT,
            "Queue consumer started"
        );
        self.emit(LifecycleEvent::Started);
        Ok(())
    }

    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<ConnectionEvent>, QueueError> {
        let connection = self.connector.connect().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        connection.subscribe(Box::new(move |event| {
            let _ = tx.send(event);
        }));

        let mut session = self.session.lock().await;
        let connection = session.connection.insert(connection);
        let channel = connection.create_channel().await?;
        session.channel = Some(channel);

        debug!(queue = %self.config.queue, "Connected to broker");
        Ok(rx)
    }

    async fn channel(&self) -> Result<Arc<dyn BrokerChannel>, QueueError> {
        self.session
            .lock()
            .await
            .channel
            .clone()
            .ok_or(QueueError::NotInitialized("channel"))
    }

    async fn setup_queue(&self) -> Result<(), QueueError> {
        let channel = self.channel().await?;
        self.topology.declare(channel.as_ref()).await?;
        channel.set_prefetch(PREFETCH_COUNT).await
    }

    /// Close channel then connection; both are attempted, the first error wins.
    async fn release_session(&self) -> Result<(), QueueError> {
        let (channel, connection) = {
            let mut session = self.session.lock().await;
            (session.channel.take(), session.connection.take())
        };

        let mut first_error = None;
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!(error = %e, "Failed to close channel");
                first_error.get_or_insert(e);
            }
        }
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!(error = %e, "Failed to close connection");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Count a failed connect and move to `Reconnecting`.
    ///
    /// Returns `None` without touching the state once `stop()` has been
    /// requested. The shutdown flag is read under the status lock, and
    /// `stop()` raises it before writing `Stopped`, so a late failure can
    /// never overwrite that phase.
    fn record_connect_failure(&self) -> Option<u32> {
        self.metrics.connected(false);
        self.status.update(|s| {
            if *self.shutdown.borrow() {
                return None;
            }
            s.is_running = false;
            s.reconnect_attempts = s.reconnect_attempts.saturating_add(1);
            s.phase = ConsumerPhase::Reconnecting;
            Some(s.reconnect_attempts)
        })
    }

    /// Retry until connected, stopped, or out of attempts.
    ///
    /// `reconnect_attempts` counts consecutive failed connects including the
    /// initial one, so an unreachable broker sees `max_reconnect_attempts`
    /// connect calls in total rather than one initial call plus that many
    /// retries.
    async fn reconnect(self: &Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let max = self.config.max_reconnect_attempts;
        let delay = self.config.reconnect_delay;

        loop {
            if *shutdown.borrow_and_update() {
                self.mark_stopped_if_pending();
                return;
            }

            let attempts = self.status.get().reconnect_attempts;
            if attempts >= max {
                self.status.update(|s| {
                    s.is_running = false;
                    s.phase = ConsumerPhase::Stopped;
                });
                error!(
                    queue = %self.config.queue,
                    attempts,
                    "Max reconnection attempts reached, consumer stopped"
                );
                self.emit(LifecycleEvent::ReconnectAbandoned { attempts });
                return;
            }

            let attempt = attempts + 1;
            self.set_phase(ConsumerPhase::Reconnecting);
            self.metrics.reconnect_attempt();
            self.emit(LifecycleEvent::Reconnecting { attempt });
            info!(
                attempt,
                max_attempts = max,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to broker"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow_and_update() {
                self.mark_stopped_if_pending();
                return;
            }

            match self.try_start().await {
                Ok(()) => return,
                Err(e) => {
                    let _ = self.release_session().await;
                    if self.record_connect_failure().is_none() {
                        debug!(attempt, error = %e, "Reconnection attempt failed after stop()");
                        return;
                    }
                    warn!(attempt, error = %e, "Reconnection attempt failed");
                }
            }
        }
    }

    async fn on_connection_lost(&self, reason: String) {
        if self.is_shutting_down() {
            return;
        }

        warn!(queue = %self.config.queue, reason = %reason, "Broker connection lost");
        self.status.update(|s| {
            s.is_running = false;
            s.phase = ConsumerPhase::Reconnecting;
        });
        self.metrics.connected(false);

        if let Err(e) = self.release_session().await {
            debug!(error = %e, "Error releasing broken session");
        }

        self.emit(LifecycleEvent::ConnectionLost { reason });
        let _ = self.reconnect_tx.send(());
    }

    async fn handle_delivery(&self, channel: &Arc<dyn BrokerChannel>, delivery: Delivery) {
        let _in_flight = self.in_flight.lock().await;
        if self.is_shutting_down() {
            // left unsettled; the broker redelivers once the channel closes
            return;
        }

        let started = Instant::now();
        let message_id = delivery
            .message
            .message_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        self.metrics.message_received();
        info!(
            message_id = %message_id,
            routing_key = %delivery.message.routing_key,
            retry_count = delivery.message.retry_count,
            redelivered = delivery.message.redelivered,
            "Received message"
        );

        let outcome = AssertUnwindSafe(self.handler.handle(&delivery.message))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

        match outcome {
            Ok(()) => match delivery.ack().await {
                Ok(()) => {
                    let duration = started.elapsed();
                    self.metrics.message_acked(duration);
                    info!(
                        message_id = %message_id,
                        duration_ms = duration.as_millis() as u64,
                        "Message processed"
                    );
                    self.emit(LifecycleEvent::MessageAcked {
                        message_id,
                        duration,
                    });
                }
                Err(e) => {
                    error!(message_id = %message_id, error = %e, "Failed to ack message");
                }
            },
            Err(err) => self.handle_failed(channel, delivery, message_id, err).await,
        }
    }

    async fn handle_failed(
        &self,
        channel: &Arc<dyn BrokerChannel>,
        delivery: Delivery,
        message_id: String,
        err: HandlerError,
    ) {
        let retry_count = delivery.message.retry_count;
        self.metrics.handler_failed(err.kind());
        warn!(
            message_id = %message_id,
            error = %err,
            retry_count,
            max_retries = self.retry.max_retries(),
            "Message failed"
        );

        match self.retry.decide(retry_count) {
            RetryDecision::Requeue => {
                let result = match self.config.requeue_mode {
                    RequeueMode::Nack => delivery.nack(true).await,
                    RequeueMode::Republish => self.republish(channel, delivery).await,
                };
                match result {
                    Ok(()) => {
                        self.metrics.message_requeued();
                        info!(
                            message_id = %message_id,
                            retry = retry_count + 1,
                            "Message requeued"
                        );
                        self.emit(LifecycleEvent::MessageRequeued {
                            message_id,
                            retry_count: retry_count + 1,
                        });
                    }
                    Err(e) => {
                        error!(message_id = %message_id, error = %e, "Failed to requeue message");
                    }
                }
            }
            RetryDecision::DeadLetter => match delivery.nack(false).await {
                Ok(()) => {
                    self.metrics.message_dead_lettered();
                    error!(
                        message_id = %message_id,
                        retry_count,
                        dead_letter_exchange = self.config.dead_letter_exchange.as_deref(),
                        "Message rejected after max retries"
                    );
                    self.emit(LifecycleEvent::MessageDeadLettered {
                        message_id,
                        retry_count,
                    });
                }
                Err(e) => {
                    error!(message_id = %message_id, error = %e, "Failed to reject message");
                }
            },
        }
    }

    /// Publish the next attempt, then ack the original. Falls back to a
    /// requeueing nack when the publish fails.
    async fn republish(
        &self,
        channel: &Arc<dyn BrokerChannel>,
        delivery: Delivery,
    ) -> Result<(), QueueError> {
        let next = delivery.message.next_attempt();
        let published = channel.publish(&self.config.exchange, &next).await;

        match published {
            Ok(()) => delivery.ack().await,
            Err(e) => {
                warn!(error = %e, "Republish failed, falling back to nack");
                delivery.nack(true).await
            }
        }
    }
}

async fn supervise<H: DeliveryHandler + 'static>(
    inner: Weak<Inner<H>>,
    mut signals: mpsc::UnboundedReceiver<()>,
) {
    while signals.recv().await.is_some() {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.reconnect().await;
    }
}

async fn dispatch<H: DeliveryHandler + 'static>(
    inner: Arc<Inner<H>>,
    channel: Arc<dyn BrokerChannel>,
    mut deliveries: DeliveryStream,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    let mut shutdown = inner.shutdown.subscribe();
    if *shutdown.borrow_and_update() {
        return;
    }
    let mut events_open = true;

    let reason = loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow_and_update() {
                    return;
                }
            }

            event = events.recv(), if events_open => match event {
                Some(ConnectionEvent::Error(e)) => {
                    warn!(error = %e, "Broker connection error");
                }
                Some(ConnectionEvent::Closed(reason)) => {
                    break reason.unwrap_or_else(|| "connection closed".to_string());
                }
                None => events_open = false,
            },

            delivery = deliveries.next() => match delivery {
                Some(Ok(delivery)) => inner.handle_delivery(&channel, delivery).await,
                Some(Err(e)) => break e.to_string(),
                None => break "delivery stream ended".to_string(),
            },
        }
    };

    inner.on_connection_lost(reason).await;
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
