//! Log-only provider for dry runs and local development.

use super::{EmailContent, EmailProvider, SentEmail};
use crate::error::NotificationResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use uuid::Uuid;

/// Logs every email instead of delivering it.
#[derive(Debug, Default)]
pub struct LogProvider {
    sent: AtomicU64,
}

impl LogProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of emails "sent" so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EmailProvider for LogProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail> {
        let message_id = format!("<{}@dry-run.local>", Uuid::new_v4());
        self.sent.fetch_add(1, Ordering::Relaxed);

        info!(
            to = %email.to_email,
            subject = %email.subject,
            message_id = %message_id,
            html_len = email.html_body.len(),
            text = %email.text_body,
            "Dry run: email not delivered"
        );

        Ok(SentEmail { message_id })
    }

    fn name(&self) -> &'static str {
        "Log"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_provider_returns_unique_ids() {
        let provider = LogProvider::new();
        let email = EmailContent {
            to_email: "a@b.com".to_string(),
            subject: "Hi".to_string(),
            ..Default::default()
        };

        let first = provider.send(&email).await.unwrap();
        let second = provider.send(&email).await.unwrap();

        assert_ne!(first.message_id, second.message_id);
        assert!(first.message_id.ends_with("@dry-run.local>"));
        assert_eq!(provider.sent_count(), 2);
        assert!(provider.health_check().await.unwrap());
    }
}
