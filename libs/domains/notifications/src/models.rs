//! Data models for the notifications domain.

use serde::{Deserialize, Serialize};

// ============================================================================
// Email Kinds
// ============================================================================

/// Kinds of email the worker can send.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    /// General information.
    #[default]
    Notification,
    /// Something the recipient did succeeded.
    Confirmation,
    /// Something needs the recipient's attention.
    Warning,
}

/// Alias table for the `type` field of inbound messages. Keys are lower-case.
const KIND_ALIASES: &[(&str, EmailKind)] = &[
    // Vietnamese
    ("thông báo", EmailKind::Notification),
    ("xác nhận", EmailKind::Confirmation),
    ("cảnh báo", EmailKind::Warning),
    // English
    ("notification", EmailKind::Notification),
    ("confirmation", EmailKind::Confirmation),
    ("warning", EmailKind::Warning),
    // Synonyms
    ("info", EmailKind::Notification),
    ("success", EmailKind::Confirmation),
    ("alert", EmailKind::Warning),
    ("danger", EmailKind::Warning),
];

impl EmailKind {
    pub const ALL: [EmailKind; 3] = [
        EmailKind::Notification,
        EmailKind::Confirmation,
        EmailKind::Warning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmailKind::Notification => "notification",
            EmailKind::Confirmation => "confirmation",
            EmailKind::Warning => "warning",
        }
    }

    /// Look up a type tag, ignoring case and surrounding whitespace.
    pub fn from_alias(raw: &str) -> Option<Self> {
        let key = raw.trim().to_lowercase();
        KIND_ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, kind)| *kind)
    }

    /// Fixed subject line for this kind.
    pub fn subject(&self) -> &'static str {
        match self {
            EmailKind::Notification => "Thông báo từ Gauas.lab",
            EmailKind::Confirmation => "Xác nhận thành công - Gauas.lab",
            EmailKind::Warning => "Cảnh báo quan trọng - Gauas.lab",
        }
    }
}

impl std::fmt::Display for EmailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Send Request / Result
// ============================================================================

/// A validated request to send one email.
///
/// Fields are private so a request cannot change after the codec built it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    kind: EmailKind,
    content: String,
    recipient: String,
    recipient_name: Option<String>,
    action_url: Option<String>,
}

impl SendRequest {
    pub fn new(kind: EmailKind, recipient: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            recipient: recipient.into(),
            recipient_name: None,
            action_url: None,
        }
    }

    pub fn with_recipient_name(mut self, name: impl Into<String>) -> Self {
        self.recipient_name = Some(name.into());
        self
    }

    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    pub fn kind(&self) -> EmailKind {
        self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn recipient_name(&self) -> Option<&str> {
        self.recipient_name.as_deref()
    }

    pub fn action_url(&self) -> Option<&str> {
        self.action_url.as_deref()
    }
}

/// Outcome of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResult {
    pub fn sent(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}
