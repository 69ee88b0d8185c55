//! Prometheus metrics for the queue consumer

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls return the existing handle.
/// If another recorder is already installed, metrics stay disabled.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;
            info!("Prometheus metrics initialized");
            Ok::<_, metrics_exporter_prometheus::BuildError>(handle)
        })
        .map_err(|e| warn!(error = %e, "Failed to install Prometheus recorder"))
        .ok()
}

pub fn metrics_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Consumer metrics helper, labelled by queue
#[derive(Debug, Clone)]
pub struct ConsumerMetrics {
    queue: String,
}

impl ConsumerMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    pub fn message_received(&self) {
        counter!("amqp_worker_messages_received_total", "queue" => self.queue.clone())
            .increment(1);
    }

    pub fn message_acked(&self, duration: Duration) {
        counter!(
            "amqp_worker_messages_total",
            "queue" => self.queue.clone(),
            "outcome" => "acked"
        )
        .increment(1);

        histogram!(
            "amqp_worker_message_duration_seconds",
            "queue" => self.queue.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn handler_failed(&self, kind: &'static str) {
        counter!(
            "amqp_worker_handler_errors_total",
            "queue" => self.queue.clone(),
            "kind" => kind
        )
        .increment(1);
    }

    pub fn message_requeued(&self) {
        counter!(
            "amqp_worker_messages_total",
            "queue" => self.queue.clone(),
            "outcome" => "requeued"
        )
        .increment(1);
    }

    pub fn message_dead_lettered(&self) {
        counter!(
            "amqp_worker_messages_total",
            "queue" => self.queue.clone(),
            "outcome" => "dead_lettered"
        )
        .increment(1);
    }

    pub fn reconnect_attempt(&self) {
        counter!("amqp_worker_reconnect_attempts_total", "queue" => self.queue.clone())
            .increment(1);
    }

    pub fn connected(&self, connected: bool) {
        gauge!("amqp_worker_connected", "queue" => self.queue.clone())
            .set(if connected { 1.0 } else { 0.0 });
    }
}
