pub mod twilio;

use async_trait::async_trait;

/// Outbound transport for replies and operator alerts.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Sends `body` to `to` over `channel` ("sms" or "whatsapp") and returns
    /// the provider's message id.
    async fn send_message(&self, channel: &str, to: &str, body: &str) -> anyhow::Result<String>;
}
