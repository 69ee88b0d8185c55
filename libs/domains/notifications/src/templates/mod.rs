//! Email template rendering engine.
//!
//! This module provides Handlebars-based rendering for the three email kinds.
//! The HTML part escapes user content; the text part keeps it verbatim.

use crate::error::NotificationResult;
use crate::models::EmailKind;
use chrono::Datelike;
use handlebars::Handlebars;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Rendered email bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    /// HTML body content.
    pub html: String,
    /// Plain text body content.
    pub text: String,
}

/// Turns a kind and its free-text content into email bodies.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        kind: EmailKind,
        content: &str,
        recipient_name: Option<&str>,
        action_url: Option<&str>,
    ) -> NotificationResult<RenderedEmail>;
}

/// Per-kind presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindStyle {
    pub color: &'static str,
    pub icon: &'static str,
    pub title: &'static str,
}

impl KindStyle {
    pub fn for_kind(kind: EmailKind) -> Self {
        match kind {
            EmailKind::Notification => KindStyle {
                color: "#4CAF50",
                icon: "🐼 📢",
                title: "Thông Báo",
            },
            EmailKind::Confirmation => KindStyle {
                color: "#2196F3",
                icon: "🐼 ✅",
                title: "Xác Nhận",
            },
            EmailKind::Warning => KindStyle {
                color: "#FF9800",
                icon: "🐼 ⚠️",
                title: "Cảnh Báo",
            },
        }
    }
}

#[derive(Serialize)]
struct TemplateData<'a> {
    color: &'static str,
    icon: &'static str,
    title: &'static str,
    badge: String,
    greeting: String,
    content: &'a str,
    action_url: Option<&'a str>,
    year: i32,
}

/// Template engine for rendering email templates.
#[derive(Clone)]
pub struct TemplateEngine {
    handlebars: Arc<Handlebars<'static>>,
}

impl TemplateEngine {
    /// Create a new template engine with all templates registered.
    pub fn new() -> NotificationResult<Self> {
        let mut handlebars = Handlebars::new();

        handlebars.register_template_string("email_html", EMAIL_HTML_TEMPLATE)?;
        handlebars.register_template_string("email_text", EMAIL_TEXT_TEMPLATE)?;

        Ok(Self {
            handlebars: Arc::new(handlebars),
        })
    }
}

impl Renderer for TemplateEngine {
    fn render(
        &self,
        kind: EmailKind,
        content: &str,
        recipient_name: Option<&str>,
        action_url: Option<&str>,
    ) -> NotificationResult<RenderedEmail> {
        debug!(kind = %kind, has_action = action_url.is_some(), "Rendering email");

        let style = KindStyle::for_kind(kind);
        let greeting = match recipient_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => format!("Xin chào {}", name),
            None => "Xin chào".to_string(),
        };

        let data = TemplateData {
            color: style.color,
            icon: style.icon,
            title: style.title,
            badge: style.title.to_uppercase(),
            greeting,
            content,
            action_url,
            year: chrono::Utc::now().year(),
        };

        Ok(RenderedEmail {
            html: self.handlebars.render("email_html", &data)?,
            text: self.handlebars.render("email_text", &data)?.trim().to_string(),
        })
    }
}

// ============================================================================
// Email Templates
// ============================================================================

const EMAIL_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="vi">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{{title}} - Gấu Trúc System</title>
</head>
<body style="margin: 0; padding: 0; font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; background-color: #f5f5f5;">
  <table role="presentation" width="100%" cellspacing="0" cellpadding="0" style="max-width: 600px; margin: 0 auto; background-color: #ffffff; border-radius: 10px; overflow: hidden;">
    <tr>
      <td style="background: linear-gradient(135deg, {{color}} 0%, {{color}}dd 100%); color: #ffffff; padding: 30px 20px; text-align: center;">
        <div style="font-size: 48px; margin-bottom: 10px;">{{icon}}</div>
        <div style="font-size: 28px; font-weight: bold; margin: 10px 0;">{{title}}</div>
        <div style="font-size: 60px; margin: 20px 0;">🐼</div>
      </td>
    </tr>
    <tr>
      <td style="padding: 40px 30px;">
        <div style="font-size: 20px; color: #333333; margin-bottom: 20px; font-weight: 600;">{{greeting}},</div>
        <div style="display: inline-block; background-color: {{color}}; color: #ffffff; padding: 8px 20px; border-radius: 20px; font-size: 14px; font-weight: bold; margin: 20px 0;">{{badge}}</div>
        <div style="font-size: 16px; line-height: 1.8; color: #555555; margin-bottom: 30px; white-space: pre-line;">{{content}}</div>
        {{#if action_url}}
        <table width="100%" cellspacing="0" cellpadding="0" style="margin-bottom: 30px;">
          <tr>
            <td style="text-align: center;">
              <a href="{{action_url}}" style="display: inline-block; background-color: {{color}}; color: #ffffff; font-size: 16px; font-weight: 500; padding: 12px 32px; text-decoration: none; border-radius: 6px;">
                Xem chi tiết
              </a>
            </td>
          </tr>
        </table>
        {{/if}}
        <div style="height: 2px; background: linear-gradient(90deg, transparent, {{color}}, transparent); margin: 30px 0;"></div>
        <div style="text-align: center; font-size: 24px; color: #4CAF50; margin: 20px 0; opacity: 0.3;">🎋 🎋 🎋</div>
      </td>
    </tr>
    <tr>
      <td style="background-color: #f9f9f9; padding: 25px 30px; text-align: center; border-top: 3px solid {{color}};">
        <div style="font-size: 40px; margin-bottom: 15px;">🐼</div>
        <div style="font-size: 14px; color: #777777; margin: 5px 0;"><strong>Gấu Trúc System</strong></div>
        <div style="font-size: 14px; color: #777777; margin: 5px 0;">Hệ thống email tự động</div>
        <div style="font-size: 12px; color: #777777; margin-top: 15px;">© {{year}} Gấu Trúc. All rights reserved.</div>
      </td>
    </tr>
  </table>
</body>
</html>
"#;

const EMAIL_TEXT_TEMPLATE: &str = r#"{{{badge}}}
==================================================

{{{greeting}}},

{{{content}}}
{{#if action_url}}

Xem chi tiết: {{{action_url}}}
{{/if}}

---
Gấu Trúc System
Hệ thống email tự động
© {{year}} Gấu Trúc. All rights reserved.
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TemplateEngine {
        TemplateEngine::new().unwrap()
    }

    #[test]
    fn test_template_engine_creation() {
        assert!(TemplateEngine::new().is_ok());
    }

    #[test]
    fn test_render_uses_kind_style() {
        let rendered = engine()
            .render(EmailKind::Warning, "Disk almost full", Some("Ops"), None)
            .unwrap();

        assert!(rendered.html.contains("#FF9800"));
        assert!(rendered.html.contains("Cảnh Báo"));
        assert!(rendered.html.contains("Xin chào Ops,"));
        assert!(rendered.html.contains("Disk almost full"));
        assert!(rendered.text.starts_with("CẢNH BÁO"));
        assert!(rendered.text.contains("Xin chào Ops,"));
    }

    #[test]
    fn test_render_each_kind() {
        let engine = engine();
        for kind in EmailKind::ALL {
            let style = KindStyle::for_kind(kind);
            let rendered = engine.render(kind, "Hello", None, None).unwrap();
            assert!(rendered.html.contains(style.color));
            assert!(rendered.html.contains(style.title));
        }
    }

    #[test]
    fn test_greeting_without_name() {
        let rendered = engine()
            .render(EmailKind::Notification, "Hello", None, None)
            .unwrap();
        assert!(rendered.text.contains("Xin chào,"));

        let rendered = engine()
            .render(EmailKind::Notification, "Hello", Some("  "), None)
            .unwrap();
        assert!(rendered.text.contains("Xin chào,"));
    }

    #[test]
    fn test_html_escapes_content_text_keeps_it() {
        let content = "<script>alert('x')</script> & more";
        let rendered = engine()
            .render(EmailKind::Notification, content, Some("Tom & Jerry"), None)
            .unwrap();

        assert!(!rendered.html.contains("<script>"));
        assert!(rendered.html.contains("&lt;script&gt;"));
        assert!(rendered.text.contains(content));
        assert!(rendered.text.contains("Xin chào Tom & Jerry,"));
    }

    #[test]
    fn test_action_url_renders_button() {
        let engine = engine();

        let with_action = engine
            .render(
                EmailKind::Confirmation,
                "Order confirmed",
                Some("Alice"),
                Some("https://example.com/orders/1"),
            )
            .unwrap();
        assert!(with_action.html.contains("href=\"https://example.com/orders/1\""));
        assert!(with_action.html.contains("Xem chi tiết"));
        assert!(with_action.text.contains("Xem chi tiết: https://example.com/orders/1"));

        let without_action = engine
            .render(EmailKind::Confirmation, "Order confirmed", Some("Alice"), None)
            .unwrap();
        assert!(!without_action.html.contains("Xem chi tiết"));
        assert!(!without_action.text.contains("Xem chi tiết"));
    }

    #[test]
    fn test_footer_has_current_year() {
        let year = chrono::Utc::now().year().to_string();
        let rendered = engine()
            .render(EmailKind::Notification, "Hello", None, None)
            .unwrap();

        assert!(rendered.html.contains("Gấu Trúc System"));
        assert!(rendered.html.contains(&format!("© {} Gấu Trúc", year)));
        assert!(rendered.text.contains("Hệ thống email tự động"));
        assert!(rendered.text.ends_with(&format!("© {} Gấu Trúc. All rights reserved.", year)));
    }
}
