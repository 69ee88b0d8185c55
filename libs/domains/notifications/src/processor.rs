//! Email processor for the queue consumer.
//!
//! This module provides the `EmailProcessor` that implements `DeliveryHandler`,
//! decoding each delivery and handing it to the [`SendEmailService`].

use crate::codec;
use crate::service::SendEmailService;
use amqp_worker::{DeliveryHandler, HandlerError, InboundMessage};
use async_trait::async_trait;
use tracing::{info, warn};

/// Decodes deliveries and sends them.
///
/// A malformed payload or an unsuccessful send is reported as a
/// [`HandlerError`], which the consumer turns into a requeue or a dead-letter.
#[derive(Clone)]
pub struct EmailProcessor {
    service: SendEmailService,
}

impl EmailProcessor {
    /// Create a new email processor.
    pub fn new(service: SendEmailService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &SendEmailService {
        &self.service
    }
}

#[async_trait]
impl DeliveryHandler for EmailProcessor {
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError> {
        let request = codec::parse(&message.body).map_err(|e| {
            warn!(
                message_id = ?message.message_id,
                retry_count = message.retry_count,
                error = %e,
                "Rejecting undecodable message"
            );
            HandlerError::malformed(e.to_string())
        })?;

        info!(
            message_id = ?message.message_id,
            kind = %request.kind(),
            recipient = %request.recipient(),
            retry_count = message.retry_count,
            "Message parsed"
        );

        let result = self.service.send_email(&request).await;
        if result.success {
            Ok(())
        } else {
            Err(HandlerError::failed(
                result.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }

    fn name(&self) -> &'static str {
        "EmailProcessor"
    }

    async fn health_check(&self) -> Result<bool, HandlerError> {
        self.service
            .provider()
            .health_check()
            .await
            .map_err(|e| HandlerError::failed(e.to_string()))
    }
}
