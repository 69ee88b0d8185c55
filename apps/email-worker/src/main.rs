//! Email Worker Service - Entry Point
//!
//! Background worker that sends emails queued on RabbitMQ.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    email_worker::run().await
}
