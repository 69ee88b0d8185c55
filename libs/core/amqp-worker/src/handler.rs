use crate::broker::InboundMessage;
use crate::error::HandlerError;
use async_trait::async_trait;

/// Trait for message handlers.
///
/// The consumer calls [`handle`](DeliveryHandler::handle) once per delivery,
/// never concurrently for the same consumer. `Ok(())` acks the message; any
/// error (or panic) goes through the retry/dead-letter path.
///
/// # Example
///
/// ```rust,ignore
/// use amqp_worker::{DeliveryHandler, HandlerError, InboundMessage};
///
/// struct EmailProcessor {
///     service: SendEmailService,
/// }
///
/// #[async_trait]
/// impl DeliveryHandler for EmailProcessor {
///     async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError> {
///         let request = codec::parse(&message.body).map_err(|e| HandlerError::malformed(e.to_string()))?;
///         self.service.send(&request).await.map_err(|e| HandlerError::failed(e.to_string()))
///     }
///
///     fn name(&self) -> &'static str {
///         "EmailProcessor"
///     }
/// }
/// ```
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Process a single delivery.
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;

    /// Health check for the handler's downstream dependencies.
    ///
    /// Default: always returns Ok(true).
    async fn health_check(&self) -> Result<bool, HandlerError> {
        Ok(true)
    }
}
