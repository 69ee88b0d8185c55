//! Decoding of raw queue payloads into [`SendRequest`]s.
//!
//! Expected payload (JSON object):
//!
//! ```json
//! { "type": "notification", "recipient": "a@b.com", "content": "Hello",
//!   "recipientName": "A", "actionUrl": "https://..." }
//! ```
//!
//! `recipient`, `content` and `type` are required strings. `type` is matched
//! against the alias table in [`EmailKind`]; unknown tags fall back to
//! `Notification` with a warning instead of failing.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{EmailKind, SendRequest};
use serde_json::{Map, Value};
use tracing::warn;

/// Parse and validate a raw payload.
pub fn parse(raw: &[u8]) -> NotificationResult<SendRequest> {
    let value: Value = serde_json::from_slice(raw)?;
    let Value::Object(fields) = value else {
        return Err(NotificationError::MalformedMessage(
            "expected a JSON object".to_string(),
        ));
    };

    let recipient = required_string(&fields, "recipient")?;
    let content = required_string(&fields, "content")?;
    if content.trim().is_empty() {
        return Err(NotificationError::MalformedMessage(
            "Invalid content".to_string(),
        ));
    }
    let type_tag = required_string(&fields, "type")?;

    let kind = EmailKind::from_alias(type_tag).unwrap_or_else(|| {
        warn!(email_type = %type_tag, "Unknown email type, using notification");
        EmailKind::Notification
    });

    let recipient_name = optional_string(&fields, &["recipientName", "recipient_name"])
        .unwrap_or_else(|| local_part(recipient));

    let mut request = SendRequest::new(kind, recipient, content).with_recipient_name(recipient_name);
    if let Some(url) = optional_string(&fields, &["actionUrl", "action_url"]) {
        request = request.with_action_url(url);
    }

    Ok(request)
}

fn required_string<'a>(fields: &'a Map<String, Value>, key: &str) -> NotificationResult<&'a str> {
    match fields.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(NotificationError::MalformedMessage(format!("Invalid {}", key))),
    }
}

/// First non-empty string among `keys`.
fn optional_string(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .filter_map(Value::as_str)
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn local_part(address: &str) -> String {
    address.split('@').next().unwrap_or(address).to_string()
}
