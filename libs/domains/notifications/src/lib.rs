//! Notifications Domain
//!
//! Transactional email delivery for the email worker.
//!
//! # Features
//!
//! - Queue payload decoding with multilingual type aliases
//! - Three email kinds: notification, confirmation, warning
//! - Handlebars HTML + plain text rendering
//! - SMTP delivery via lettre, or log-only dry runs
//! - Per-send timeout around every provider call
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    RabbitMQ     │  ← email_exchange / email_queue
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  QueueConsumer  │  ← amqp-worker: ack / requeue / dead-letter
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ EmailProcessor  │  ← codec::parse → SendRequest
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │SendEmailService │  ← validate, render, send → SendResult
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ Email Provider  │  ← SMTP, Log
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{EmailProcessor, SendEmailService, SmtpProvider, TemplateEngine};
//!
//! let provider = Arc::new(SmtpProvider::new(smtp_config)?);
//! let service = SendEmailService::new(provider, Arc::new(TemplateEngine::new()?));
//!
//! let consumer = QueueConsumer::new(connector, EmailProcessor::new(service), consumer_config);
//! consumer.start().await?;
//! ```

pub mod codec;
pub mod error;
pub mod models;
pub mod processor;
pub mod providers;
pub mod service;
pub mod templates;

// Re-export commonly used types
pub use error::{NotificationError, NotificationResult};
pub use models::{EmailKind, SendRequest, SendResult};
pub use processor::EmailProcessor;
pub use providers::{EmailContent, EmailProvider, LogProvider, SentEmail, SmtpProvider};
pub use service::{SendEmailService, DEFAULT_SEND_TIMEOUT};
pub use templates::{RenderedEmail, Renderer, TemplateEngine};
