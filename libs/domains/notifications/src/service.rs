//! Send orchestration.
//!
//! `SendEmailService` validates a [`SendRequest`], renders it, hands it to the
//! [`EmailProvider`] and folds every outcome into a [`SendResult`]. It never
//! returns an error to its caller.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{SendRequest, SendResult};
use crate::providers::{EmailContent, EmailProvider, SentEmail};
use crate::templates::Renderer;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Upper bound for a single provider call unless configured otherwise.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid"));

/// Check the address syntax the gateway relies on.
pub fn is_valid_recipient(address: &str) -> bool {
    EMAIL_REGEX.is_match(address)
}

/// Domain rules applied before anything is rendered or sent.
pub fn validate(request: &SendRequest) -> NotificationResult<()> {
    if !is_valid_recipient(request.recipient()) {
        return Err(NotificationError::InvalidRecipient(request.recipient().to_string()));
    }
    if request.content().trim().is_empty() {
        return Err(NotificationError::EmptyContent);
    }
    Ok(())
}

/// Service for sending one email per request.
#[derive(Clone)]
pub struct SendEmailService {
    provider: Arc<dyn EmailProvider>,
    renderer: Arc<dyn Renderer>,
    send_timeout: Option<Duration>,
}

impl SendEmailService {
    pub fn new(provider: Arc<dyn EmailProvider>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            provider,
            renderer,
            send_timeout: Some(DEFAULT_SEND_TIMEOUT),
        }
    }

    /// `None` lets a provider call run unbounded.
    pub fn with_send_timeout(mut self, send_timeout: Option<Duration>) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmailProvider> {
        &self.provider
    }

    /// Validate, render and send. Failures end up in [`SendResult::error`].
    pub async fn send_email(&self, request: &SendRequest) -> SendResult {
        let started = Instant::now();

        info!(
            kind = %request.kind(),
            recipient = %request.recipient(),
            content_length = request.content().len(),
            provider = self.provider.name(),
            "Processing email message"
        );

        match self.try_send(request).await {
            Ok(sent) => {
                info!(
                    kind = %request.kind(),
                    recipient = %request.recipient(),
                    message_id = %sent.message_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Email sent successfully"
                );
                SendResult::sent(sent.message_id)
            }
            Err(e) if e.is_validation() => {
                warn!(
                    kind = %request.kind(),
                    recipient = %request.recipient(),
                    error = %e,
                    "Email rejected before sending"
                );
                SendResult::failed(e.to_string())
            }
            Err(e) => {
                error!(
                    kind = %request.kind(),
                    recipient = %request.recipient(),
                    error = %e,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Failed to send email"
                );
                SendResult::failed(e.to_string())
            }
        }
    }

    async fn try_send(&self, request: &SendRequest) -> NotificationResult<SentEmail> {
        validate(request)?;

        let kind = request.kind();
        let rendered = self.renderer.render(
            kind,
            request.content(),
            request.recipient_name(),
            request.action_url(),
        )?;

        let email = EmailContent {
            to_email: request.recipient().to_string(),
            to_name: request.recipient_name().map(str::to_string),
            subject: kind.subject().to_string(),
            html_body: rendered.html,
            text_body: rendered.text,
        };

        match self.send_timeout {
            Some(limit) => tokio::time::timeout(limit, self.provider.send(&email))
                .await
                .map_err(|_| NotificationError::Timeout(limit))?,
            None => self.provider.send(&email).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailKind;
    use crate::providers::MockEmailProvider;
    use crate::templates::{RenderedEmail, TemplateEngine};
    use async_trait::async_trait;
    use mockall::predicate::*;

    fn service(provider: impl EmailProvider + 'static) -> SendEmailService {
        SendEmailService::new(Arc::new(provider), Arc::new(TemplateEngine::new().unwrap()))
    }

    fn mock_sending(message_id: &'static str) -> MockEmailProvider {
        let mut provider = MockEmailProvider::new();
        provider.expect_name().return_const("Mock");
        provider
            .expect_send()
            .returning(move |_| Ok(SentEmail { message_id: message_id.to_string() }));
        provider
    }

    #[test]
    fn test_recipient_syntax() {
        assert!(is_valid_recipient("a@b.com"));
        assert!(is_valid_recipient("first.last+tag@sub.example.org"));
        assert!(!is_valid_recipient("not-an-email"));
        assert!(!is_valid_recipient("a@b"));
        assert!(!is_valid_recipient("a b@c.com"));
        assert!(!is_valid_recipient("@b.com"));
        assert!(!is_valid_recipient(""));
    }

    #[tokio::test]
    async fn test_send_success_wraps_message_id() {
        let service = service(mock_sending("m1"));
        let request = SendRequest::new(EmailKind::Notification, "a@b.com", "Hello");

        let result = service.send_email(&request).await;

        assert_eq!(result, SendResult::sent("m1"));
    }

    #[tokio::test]
    async fn test_send_builds_content_for_provider() {
        let mut provider = MockEmailProvider::new();
        provider.expect_name().return_const("Mock");
        provider
            .expect_send()
            .withf(|email: &EmailContent| {
                email.to_email == "alice@example.com"
                    && email.to_name.as_deref() == Some("Alice")
                    && email.subject == "Xác nhận thành công - Gauas.lab"
                    && email.html_body.contains("Order shipped")
                    && email.text_body.contains("Xin chào Alice,")
            })
            .times(1)
            .returning(|_| Ok(SentEmail { message_id: "m2".to_string() }));

        let request = SendRequest::new(EmailKind::Confirmation, "alice@example.com", "Order shipped")
            .with_recipient_name("Alice");
        let result = service(provider).send_email(&request).await;

        assert!(result.success);
        assert_eq!(result.message_id.as_deref(), Some("m2"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_never_reaches_provider() {
        let mut provider = MockEmailProvider::new();
        provider.expect_name().return_const("Mock");
        provider.expect_send().never();

        let request = SendRequest::new(EmailKind::Warning, "not-an-email", "x");
        let result = service(provider).send_email(&request).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("Invalid recipient"));
        assert!(result.message_id.is_none());
    }

    #[tokio::test]
    async fn test_blank_content_is_rejected() {
        let mut provider = MockEmailProvider::new();
        provider.expect_name().return_const("Mock");
        provider.expect_send().never();

        let request = SendRequest::new(EmailKind::Notification, "a@b.com", "  \n ");
        let result = service(provider).send_email(&request).await;

        assert_eq!(result, SendResult::failed("Email content cannot be empty"));
    }

    #[tokio::test]
    async fn test_provider_error_is_captured() {
        let mut provider = MockEmailProvider::new();
        provider.expect_name().return_const("Mock");
        provider
            .expect_send()
            .returning(|_| Err(NotificationError::Provider("connection refused".to_string())));

        let request = SendRequest::new(EmailKind::Notification, "a@b.com", "Hello");
        let result = service(provider).send_email(&request).await;

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Email provider error: connection refused")
        );
    }

    #[tokio::test]
    async fn test_render_error_is_captured() {
        struct BrokenRenderer;

        impl Renderer for BrokenRenderer {
            fn render(
                &self,
                _kind: EmailKind,
                _content: &str,
                _recipient_name: Option<&str>,
                _action_url: Option<&str>,
            ) -> NotificationResult<RenderedEmail> {
                Err(NotificationError::Template("missing partial".to_string()))
            }
        }

        let mut provider = MockEmailProvider::new();
        provider.expect_name().return_const("Mock");
        provider.expect_send().never();

        let service = SendEmailService::new(Arc::new(provider), Arc::new(BrokenRenderer));
        let result = service
            .send_email(&SendRequest::new(EmailKind::Notification, "a@b.com", "Hello"))
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing partial"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_provider_times_out() {
        struct HungProvider;

        #[async_trait]
        impl EmailProvider for HungProvider {
            async fn send(&self, _email: &EmailContent) -> NotificationResult<SentEmail> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(SentEmail { message_id: "late".to_string() })
            }

            fn name(&self) -> &'static str {
                "Hung"
            }

            async fn health_check(&self) -> NotificationResult<bool> {
                Ok(true)
            }
        }

        let service = service(HungProvider).with_send_timeout(Some(Duration::from_millis(250)));
        let result = service
            .send_email(&SendRequest::new(EmailKind::Notification, "a@b.com", "Hello"))
            .await;

        assert_eq!(result, SendResult::failed("Email send timed out after 250ms"));
    }

    #[tokio::test]
    async fn test_identical_requests_are_sent_twice() {
        let mut provider = MockEmailProvider::new();
        provider.expect_name().return_const("Mock");
        provider
            .expect_send()
            .with(always())
            .times(2)
            .returning(|_| Ok(SentEmail { message_id: uuid::Uuid::new_v4().to_string() }));

        let service = service(provider);
        let request = SendRequest::new(EmailKind::Notification, "a@b.com", "Hello");

        let first = service.send_email(&request).await;
        let second = service.send_email(&request).await;

        assert!(first.success && second.success);
        assert_ne!(first.message_id, second.message_id);
    }
}
