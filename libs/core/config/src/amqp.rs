use crate::{env_optional, env_or_default, env_parse_or, env_required, ConfigError, FromEnv};

/// RabbitMQ (AMQP 0.9.1) configuration
#[derive(Clone, Debug)]
pub struct AmqpConfig {
    pub url: String,
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub message_ttl_ms: u32,
    pub max_length: u32,
    pub dead_letter_exchange: Option<String>,
    /// `nack` or `republish`
    pub requeue_mode: String,
}

impl AmqpConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            queue: "email_queue".to_string(),
            exchange: "email_exchange".to_string(),
            routing_key: "email.*".to_string(),
            message_ttl_ms: 86_400_000,
            max_length: 10_000,
            dead_letter_exchange: None,
            requeue_mode: "nack".to_string(),
        }
    }

    /// URL with the credentials stripped, safe to log.
    pub fn redacted_url(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***@{}", &self.url[..scheme_end], &self.url[at + 1..])
            }
            _ => self.url.clone(),
        }
    }
}

impl FromEnv for AmqpConfig {
    /// Requires RABBITMQ_URL (amqp:// or amqps://); everything else has a default.
    fn from_env() -> Result<Self, ConfigError> {
        let url = env_required("RABBITMQ_URL")?;
        if !(url.starts_with("amqp://") || url.starts_with("amqps://")) {
            return Err(ConfigError::invalid(
                "RABBITMQ_URL",
                "expected an amqp:// or amqps:// URL",
            ));
        }

        let defaults = Self::new(url);

        let requeue_mode = env_or_default("RABBITMQ_REQUEUE_MODE", &defaults.requeue_mode)
            .trim()
            .to_ascii_lowercase();
        if requeue_mode != "nack" && requeue_mode != "republish" {
            return Err(ConfigError::invalid(
                "RABBITMQ_REQUEUE_MODE",
                format!("expected 'nack' or 'republish', got '{}'", requeue_mode),
            ));
        }

        let max_length = env_parse_or("RABBITMQ_MAX_LENGTH", defaults.max_length)?;
        if max_length == 0 {
            return Err(ConfigError::invalid("RABBITMQ_MAX_LENGTH", "must be greater than 0"));
        }

        Ok(Self {
            queue: env_or_default("RABBITMQ_QUEUE", &defaults.queue),
            exchange: env_or_default("RABBITMQ_EXCHANGE", &defaults.exchange),
            routing_key: env_or_default("RABBITMQ_ROUTING_KEY", &defaults.routing_key),
            message_ttl_ms: env_parse_or("RABBITMQ_MESSAGE_TTL_MS", defaults.message_ttl_ms)?,
            max_length,
            dead_letter_exchange: env_optional("RABBITMQ_DEAD_LETTER_EXCHANGE"),
            requeue_mode,
            url: defaults.url,
        })
    }
}
