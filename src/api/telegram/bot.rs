use crate::bot::handler::InboundMessage;
use crate::error::{BitwatchError, Result};
use crate::monitor::ChatId;
use crate::notify::Notifier;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

const LONG_POLL_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    first_name: String,
    username: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Telegram Bot API client: `sendMessage` out, `getUpdates` long-poll in.
pub struct TelegramBot {
    client: reqwest::Client,
    endpoint: String,
}

impl TelegramBot {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        // Long polls hold the connection open, so the client timeout sits above them.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 10))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
        })
    }

    /// Forwards text messages into `sender` until the receiving side is dropped.
    pub async fn poll_updates(&self, sender: mpsc::Sender<InboundMessage>) -> Result<()> {
        info!("Polling Telegram for updates");
        let mut offset: i64 = 0;

        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("getUpdates failed: {}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = parse_update(update) else {
                    continue;
                };
                if sender.send(message).await.is_err() {
                    error!("Command channel closed, stopping Telegram polling");
                    return Ok(());
                }
            }
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let response = self
            .client
            .get(format!("{}/getUpdates", self.endpoint))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", LONG_POLL_SECS.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .send()
            .await?;
        let body: ApiResponse<Vec<Update>> = response.json().await?;
        if !body.ok {
            return Err(BitwatchError::UpstreamFetch(
                body.description
                    .unwrap_or_else(|| "getUpdates rejected".to_string()),
            ));
        }
        Ok(body.result.unwrap_or_default())
    }
}

#[async_trait]
impl Notifier for TelegramBot {
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/sendMessage", self.endpoint))
            .json(&SendMessage {
                chat_id: chat.0,
                text,
            })
            .send()
            .await
            .map_err(|e| BitwatchError::DeliverySend(e.to_string()))?;

        let body: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| BitwatchError::DeliverySend(e.to_string()))?;
        if !body.ok {
            return Err(BitwatchError::DeliverySend(
                body.description
                    .unwrap_or_else(|| "sendMessage rejected".to_string()),
            ));
        }
        debug!("Message sent to {}", chat);
        Ok(())
    }
}

fn parse_update(update: Update) -> Option<InboundMessage> {
    let message = update.message?;
    let text = message.text?;
    let sender = message
        .from
        .map(|user| match user.username {
            Some(name) => format!("@{}", name),
            None => user.first_name,
        })
        .unwrap_or_else(|| "unknown".to_string());
    Some(InboundMessage {
        chat: ChatId(message.chat.id),
        sender,
        text,
    })
}
