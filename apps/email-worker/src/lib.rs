//! Email Worker Service
//!
//! A background worker that sends transactional emails queued on RabbitMQ.
//!
//! ## Architecture
//!
//! ```text
//! RabbitMQ (email_exchange, topic)
//!   ↓ (email.* → email_queue, prefetch 1)
//! QueueConsumer<EmailProcessor>
//!   ↓ (decode, validate, render)
//! SendEmailService
//!   ↓
//! SMTP server (or the dry-run log provider)
//! ```
//!
//! ## Features
//!
//! - Manual ack, bounded requeue, dead-letter after `MAX_RETRIES`
//! - Fixed-delay reconnection up to `MAX_RECONNECT_ATTEMPTS`
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Health, readiness and Prometheus endpoints for Kubernetes probes

use amqp_worker::{
    health_router, metrics, ConsumerConfig, HealthState, LapinConnector, LifecycleEvent, QueueConsumer,
    RequeueMode,
};
use axum::Router;
use core_config::{
    amqp::AmqpConfig, server::HealthServerConfig, service::ServiceConfig, smtp::SmtpConfig, FromEnv,
};
use domain_notifications::{
    EmailProcessor, EmailProvider, LogProvider, SendEmailService, SmtpProvider, TemplateEngine,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// All configuration the worker needs, validated up front.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub service: ServiceConfig,
    pub amqp: AmqpConfig,
    pub smtp: SmtpConfig,
    pub health: HealthServerConfig,
}

impl WorkerSettings {
    /// Load every config section from the environment.
    ///
    /// # Errors
    ///
    /// Returns the first missing or invalid variable.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            service: ServiceConfig::from_env().wrap_err("Failed to load service configuration")?,
            amqp: AmqpConfig::from_env().wrap_err("Failed to load RabbitMQ configuration")?,
            smtp: SmtpConfig::from_env().wrap_err("Failed to load SMTP configuration")?,
            health: HealthServerConfig::from_env().wrap_err("Failed to load health server configuration")?,
        })
    }
}

/// Map the environment-level AMQP settings onto the consumer's config.
pub fn consumer_config(amqp: &AmqpConfig) -> Result<ConsumerConfig> {
    let requeue_mode: RequeueMode = amqp
        .requeue_mode
        .parse()
        .wrap_err("Invalid RABBITMQ_REQUEUE_MODE")?;

    Ok(ConsumerConfig::new(amqp.queue.clone(), amqp.exchange.clone())
        .with_routing_pattern(amqp.routing_key.clone())
        .with_message_ttl_ms(amqp.message_ttl_ms)
        .with_max_length(amqp.max_length)
        .with_dead_letter_exchange(amqp.dead_letter_exchange.clone())
        .with_requeue_mode(requeue_mode))
}

/// Pick the delivery gateway: log-only for dry runs, SMTP otherwise.
pub fn build_provider(smtp: &SmtpConfig) -> Result<Arc<dyn EmailProvider>> {
    if smtp.dry_run {
        info!("SMTP_DRY_RUN set, emails will be logged instead of sent");
        return Ok(Arc::new(LogProvider::new()));
    }

    let provider = SmtpProvider::new(smtp.clone()).wrap_err("Failed to create SMTP provider")?;
    Ok(Arc::new(provider))
}

/// Start the health HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Consumer state: `/consumer/status`
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, config: HealthServerConfig) -> Result<()> {
    let app: Router = health_router(health_state);

    let addr = config.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(address = %addr, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Log consumer lifecycle events until the channel closes.
async fn observe_events(mut events: broadcast::Receiver<LifecycleEvent>) {
    loop {
        match events.recv().await {
            Ok(LifecycleEvent::Started) => info!("Consumer started"),
            Ok(LifecycleEvent::Stopped) => info!("Consumer stopped"),
            Ok(LifecycleEvent::ConnectionLost { reason }) => {
                warn!(reason = %reason, "Broker connection lost")
            }
            Ok(LifecycleEvent::Reconnecting { attempt }) => {
                info!(attempt, "Reconnecting to broker")
            }
            Ok(LifecycleEvent::ReconnectAbandoned { attempts }) => {
                error!(attempts, "Gave up reconnecting; consumer stays stopped until restart")
            }
            Ok(LifecycleEvent::MessageAcked { message_id, duration }) => {
                debug!(message_id = %message_id, duration_ms = duration.as_millis() as u64, "Job processed")
            }
            Ok(LifecycleEvent::MessageRequeued { message_id, retry_count }) => {
                debug!(message_id = %message_id, retry_count, "Job requeued")
            }
            Ok(LifecycleEvent::MessageDeadLettered { message_id, retry_count }) => {
                warn!(message_id = %message_id, retry_count, "Job dead-lettered")
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Lifecycle observer lagged")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Run the email worker
///
/// This is the main entry point for the worker. It:
/// 1. Installs color-eyre and sets up structured logging
/// 2. Loads and validates all configuration (fatal on failure)
/// 3. Builds the provider, renderer, send service and consumer
/// 4. Starts the consumer and the health server
/// 5. Stops the consumer on SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if:
/// - Any configuration section is missing or invalid
/// - The SMTP transport or templates cannot be built
/// - The consumer reports a state error on start or stop
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let settings = WorkerSettings::from_env()?;
    core_config::tracing::init_tracing(&settings.service.environment);

    // Initialize Prometheus metrics
    metrics::init_metrics();

    info!(
        name = %settings.service.name,
        namespace = %settings.service.namespace,
        version = %settings.service.version,
        environment = settings.service.environment.as_str(),
        "Starting email worker service"
    );
    info!(
        url = %settings.amqp.redacted_url(),
        queue = %settings.amqp.queue,
        exchange = %settings.amqp.exchange,
        routing_key = %settings.amqp.routing_key,
        requeue_mode = %settings.amqp.requeue_mode,
        "RabbitMQ configuration loaded"
    );

    let consumer_config = consumer_config(&settings.amqp)?;

    let provider = build_provider(&settings.smtp)?;
    match provider.health_check().await {
        Ok(_) => info!(provider = provider.name(), "Email provider reachable"),
        Err(e) => warn!(provider = provider.name(), error = %e, "Email provider health check failed"),
    }

    let templates = TemplateEngine::new().wrap_err("Failed to load email templates")?;
    let service = SendEmailService::new(provider, Arc::new(templates))
        .with_send_timeout(settings.smtp.send_timeout);
    let processor = EmailProcessor::new(service);
    info!("Email processor initialized");

    let connector = Arc::new(LapinConnector::new(
        settings.amqp.url.clone(),
        settings.service.name.clone(),
    ));
    let consumer = QueueConsumer::new(connector, processor, consumer_config);

    tokio::spawn(observe_events(consumer.subscribe()));

    let health_state = HealthState::new(
        settings.service.name.clone(),
        settings.service.version.clone(),
        settings.amqp.queue.clone(),
        consumer.status_handle(),
    );
    let health_config = settings.health.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_config).await {
            error!(error = %e, "Health server failed");
        }
    });

    info!("Starting email consumer...");
    consumer
        .start()
        .await
        .wrap_err("Failed to start email consumer")?;

    if let Err(e) = shutdown_signal().await {
        error!("Error waiting for shutdown signal: {}", e);
    }

    consumer
        .stop()
        .await
        .wrap_err("Failed to stop email consumer")?;

    info!("Email worker service stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
            result
        },
        result = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
            result
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_consumer_config_from_amqp_config() {
        let mut amqp = AmqpConfig::new("amqp://localhost:5672".to_string());
        amqp.queue = "mail".to_string();
        amqp.routing_key = "mail.#".to_string();
        amqp.max_length = 500;
        amqp.dead_letter_exchange = Some("mail.dlx".to_string());
        amqp.requeue_mode = "republish".to_string();

        let config = consumer_config(&amqp).unwrap();

        assert_eq!(config.queue, "mail");
        assert_eq!(config.exchange, "email_exchange");
        assert_eq!(config.routing_pattern, "mail.#");
        assert_eq!(config.max_length, 500);
        assert_eq!(config.message_ttl_ms, 86_400_000);
        assert_eq!(config.dead_letter_exchange.as_deref(), Some("mail.dlx"));
        assert_eq!(config.requeue_mode, RequeueMode::Republish);
        assert_eq!(config.max_retries, amqp_worker::MAX_RETRIES);
        assert_eq!(config.reconnect_delay, Duration::from_millis(5000));
    }

    #[test]
    fn test_consumer_config_rejects_unknown_requeue_mode() {
        let mut amqp = AmqpConfig::new("amqp://localhost:5672".to_string());
        amqp.requeue_mode = "drop".to_string();

        assert!(consumer_config(&amqp).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_uses_log_provider() {
        let mut smtp = SmtpConfig::new("localhost", "noreply@gauas.lab");
        smtp.dry_run = true;

        let provider = build_provider(&smtp).unwrap();
        assert_eq!(provider.name(), "Log");
        assert!(provider.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_smtp_provider_when_not_dry_run() {
        let smtp = SmtpConfig::new("localhost", "noreply@gauas.lab").with_port(1025);

        let provider = build_provider(&smtp).unwrap();
        assert_eq!(provider.name(), "SMTP");
    }
}
