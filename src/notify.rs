use crate::error::Result;
use crate::monitor::ChatId;
use async_trait::async_trait;

/// Outbound side of the chat transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<()>;
}
