//! Error types for the notifications domain.

use std::time::Duration;
use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Queue payload failed structural or field validation.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Recipient does not look like an email address.
    #[error("Invalid recipient email: {0}")]
    InvalidRecipient(String),

    /// Content is missing or only whitespace.
    #[error("Email content cannot be empty")]
    EmptyContent,

    /// Email provider error.
    #[error("Email provider error: {0}")]
    Provider(String),

    /// The provider did not answer within the per-send bound.
    #[error("Email send timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Template rendering error.
    #[error("Template rendering error: {0}")]
    Template(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NotificationError {
    /// Validation failures are rejected before any provider call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            NotificationError::InvalidRecipient(_) | NotificationError::EmptyContent
        )
    }
}

impl From<handlebars::RenderError> for NotificationError {
    fn from(err: handlebars::RenderError) -> Self {
        NotificationError::Template(err.to_string())
    }
}

impl From<handlebars::TemplateError> for NotificationError {
    fn from(err: handlebars::TemplateError) -> Self {
        NotificationError::Template(format!("Failed to register template: {}", err))
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::MalformedMessage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = NotificationError::InvalidRecipient("not-an-email".to_string());
        assert_eq!(err.to_string(), "Invalid recipient email: not-an-email");

        assert_eq!(
            NotificationError::EmptyContent.to_string(),
            "Email content cannot be empty"
        );

        let err = NotificationError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Email send timed out after 30000ms");
    }

    #[test]
    fn test_is_validation() {
        assert!(NotificationError::EmptyContent.is_validation());
        assert!(NotificationError::InvalidRecipient("x".into()).is_validation());
        assert!(!NotificationError::Provider("down".into()).is_validation());
        assert!(!NotificationError::MalformedMessage("bad".into()).is_validation());
    }
}
