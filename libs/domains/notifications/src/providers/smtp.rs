//! SMTP email provider implementation using lettre.

use super::{EmailContent, EmailProvider, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use core_config::smtp::SmtpConfig;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// How the transport talks to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSecurity {
    /// TLS from the first byte (`SMTP_SECURE=true`, usually port 465).
    ImplicitTls,
    /// Plain connection upgraded with STARTTLS before authenticating.
    StartTls,
    /// No TLS at all (local catch-all servers like Mailpit).
    Plaintext,
}

impl TransportSecurity {
    pub fn for_config(config: &SmtpConfig) -> Self {
        if config.secure {
            TransportSecurity::ImplicitTls
        } else if config.has_credentials() {
            TransportSecurity::StartTls
        } else {
            TransportSecurity::Plaintext
        }
    }
}

/// SMTP delivery gateway.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    config: Arc<SmtpConfig>,
}

impl SmtpProvider {
    /// Create a new SMTP provider.
    pub fn new(config: SmtpConfig) -> NotificationResult<Self> {
        let transport = Self::build_transport(&config)?;
        let from = Self::from_mailbox(&config)?;

        info!(
            host = %config.host,
            port = config.port,
            security = ?TransportSecurity::for_config(&config),
            authenticated = config.has_credentials(),
            "Initializing SMTP transport"
        );

        Ok(Self {
            transport,
            from,
            config: Arc::new(config),
        })
    }

    /// Build the SMTP transport based on configuration.
    fn build_transport(config: &SmtpConfig) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = match TransportSecurity::for_config(config) {
            TransportSecurity::ImplicitTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotificationError::Config(format!("Failed to create SMTP relay: {}", e)))?,
            TransportSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host).map_err(|e| {
                    NotificationError::Config(format!("Failed to create STARTTLS relay: {}", e))
                })?
            }
            TransportSecurity::Plaintext => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
        };

        let mut builder = builder.port(config.port).timeout(config.send_timeout);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    fn from_mailbox(config: &SmtpConfig) -> NotificationResult<Mailbox> {
        let address: Address = config
            .from_email
            .parse()
            .map_err(|e| NotificationError::Config(format!("Invalid from address: {}", e)))?;
        Ok(Mailbox::new(Some(config.from_name.clone()), address))
    }

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.config.from_domain())
    }

    /// Build a lettre Message from EmailContent.
    fn build_message(&self, email: &EmailContent, message_id: &str) -> NotificationResult<Message> {
        let address: Address = email
            .to_email
            .parse()
            .map_err(|e| NotificationError::InvalidRecipient(format!("{}: {}", email.to_email, e)))?;
        let to = Mailbox::new(email.to_name.clone(), address);

        // Build multipart message with both text and HTML
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .message_id(Some(message_id.to_string()))
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )
            .map_err(|e| NotificationError::Provider(format!("Failed to build email message: {}", e)))
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail> {
        debug!(
            to = %email.to_email,
            subject = %email.subject,
            host = %self.config.host,
            port = %self.config.port,
            "Sending email via SMTP"
        );

        let message_id = self.new_message_id();
        let message = self.build_message(email, &message_id)?;

        self.transport.send(message).await.map_err(|e| {
            error!(
                to = %email.to_email,
                error = %e,
                "Failed to send email via SMTP"
            );
            NotificationError::Provider(format!("SMTP send failed: {}", e))
        })?;

        info!(
            to = %email.to_email,
            message_id = %message_id,
            "Email sent successfully via SMTP"
        );

        Ok(SentEmail { message_id })
    }

    fn name(&self) -> &'static str {
        "SMTP"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| NotificationError::Provider(format!("SMTP health check failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SmtpConfig {
        SmtpConfig::new("localhost", "noreply@gauas.lab").with_port(1025)
    }

    fn content(to: &str) -> EmailContent {
        EmailContent {
            to_email: to.to_string(),
            to_name: Some("Alice".to_string()),
            subject: "Thông báo từ Gauas.lab".to_string(),
            html_body: "<p>Hello</p>".to_string(),
            text_body: "Hello".to_string(),
        }
    }

    #[test]
    fn test_transport_security_selection() {
        assert_eq!(TransportSecurity::for_config(&config()), TransportSecurity::Plaintext);
        assert_eq!(
            TransportSecurity::for_config(&config().with_credentials("user", "pass")),
            TransportSecurity::StartTls
        );
        assert_eq!(
            TransportSecurity::for_config(&config().with_secure(true).with_credentials("user", "pass")),
            TransportSecurity::ImplicitTls
        );
    }

    #[tokio::test]
    async fn test_new_provider_from_config() {
        let provider = SmtpProvider::new(config()).unwrap();
        assert_eq!(provider.name(), "SMTP");
        assert_eq!(provider.from.email.to_string(), "noreply@gauas.lab");
        assert_eq!(provider.from.name.as_deref(), Some("Gau Email Service"));
    }

    #[tokio::test]
    async fn test_message_id_uses_sender_domain() {
        let provider = SmtpProvider::new(config()).unwrap();
        let id = provider.new_message_id();
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@gauas.lab>"));
        assert_ne!(id, provider.new_message_id());
    }

    #[tokio::test]
    async fn test_build_message() {
        let provider = SmtpProvider::new(config()).unwrap();
        let message = provider
            .build_message(&content("alice@example.com"), "<id-1@gauas.lab>")
            .unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Message-ID: <id-1@gauas.lab>"));
        assert!(raw.contains("alice@example.com"));
        assert!(raw.contains("noreply@gauas.lab"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[tokio::test]
    async fn test_build_message_rejects_bad_recipient() {
        let provider = SmtpProvider::new(config()).unwrap();
        let err = provider
            .build_message(&content("not-an-email"), "<id@gauas.lab>")
            .unwrap_err();
        assert!(matches!(err, NotificationError::InvalidRecipient(_)));
    }
}
