use crate::bot::commands::{parse_decimal, parse_interval, parse_limit, Command, USAGE};
use crate::error::{BitwatchError, Result};
use crate::format::MessageFormatter;
use crate::monitor::alert_job::AlertKind;
use crate::monitor::scheduler::Scheduler;
use crate::monitor::ChatId;
use crate::notify::Notifier;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Message received from the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat: ChatId,
    /// Display name of the sender, for logs only.
    pub sender: String,
    pub text: String,
}

#[derive(Clone, Copy)]
enum LimitSide {
    Lower,
    Upper,
}

impl LimitSide {
    fn label(self) -> &'static str {
        match self {
            LimitSide::Lower => "lower",
            LimitSide::Upper => "upper",
        }
    }

    fn capitalized(self) -> &'static str {
        match self {
            LimitSide::Lower => "Lower",
            LimitSide::Upper => "Upper",
        }
    }
}

/// Turns inbound commands into scheduler/store calls and a reply text.
pub struct CommandHandler {
    scheduler: Arc<Scheduler>,
    formatter: MessageFormatter,
    default_interval: Duration,
}

impl CommandHandler {
    pub fn new(
        scheduler: Arc<Scheduler>,
        formatter: MessageFormatter,
        default_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            formatter,
            default_interval,
        }
    }

    /// Always yields a reply; rejected input becomes an error message for the chat.
    pub async fn handle(&self, message: &InboundMessage) -> String {
        debug!("Message from {}: {}", message.sender, message.text);
        let command = Command::parse(&message.text);
        match self.dispatch(message.chat, command).await {
            Ok(reply) => reply,
            Err(BitwatchError::InvalidInput(e)) => {
                info!("Rejected input from {}: {}", message.chat, e);
                format!("Error: {}", e)
            }
            Err(e) => format!("Error: {}", e),
        }
    }

    async fn dispatch(&self, chat: ChatId, command: Command) -> Result<String> {
        match command {
            Command::Help => Ok(USAGE.to_string()),
            Command::Now => Ok(self.current_price(chat)),
            Command::Subscribe(arg) => {
                let interval = match arg {
                    Some(raw) => parse_interval(&raw)?,
                    None => self.default_interval,
                };
                self.scheduler.subscribe(chat, interval).await;
                Ok(format!(
                    "Price alert set, every {} seconds.",
                    interval.as_secs()
                ))
            }
            Command::Unsubscribe => {
                if self.scheduler.unsubscribe(chat).await {
                    Ok("Price alert stopped.".to_string())
                } else {
                    Ok("Price alert was not set.".to_string())
                }
            }
            Command::SetLower(arg) => self.limit(chat, LimitSide::Lower, arg),
            Command::SetUpper(arg) => self.limit(chat, LimitSide::Upper, arg),
            Command::SetAmount(arg) => self.amount(chat, arg),
            Command::Unknown(name) => Ok(format!(
                "Unknown command /{}. Send /help for the list of commands.",
                name
            )),
            Command::Echo(text) => {
                info!("Echo for {}: {}", chat, text);
                Ok(text)
            }
        }
    }

    fn current_price(&self, chat: ChatId) -> String {
        let store = self.scheduler.store();
        let subscriber = store.get_or_create(chat);
        let price = self.scheduler.cache().read();
        self.formatter
            .alert_message(AlertKind::Current, &price, subscriber.holding_value(price.value))
    }

    fn limit(&self, chat: ChatId, side: LimitSide, arg: Option<String>) -> Result<String> {
        let store = self.scheduler.store();
        let Some(raw) = arg else {
            let subscriber = store.get_or_create(chat);
            let current = match side {
                LimitSide::Lower => subscriber.lower_limit,
                LimitSide::Upper => subscriber.upper_limit,
            };
            return Ok(format!(
                "Current {} limit: {}",
                side.label(),
                self.formatter.format_amount(current)
            ));
        };

        let input = parse_limit(
            &raw,
            self.formatter.currency_symbol(),
            self.formatter.currency_code(),
        )?;
        let subscriber = match side {
            LimitSide::Lower => store.set_lower_limit(chat, input)?,
            LimitSide::Upper => store.set_upper_limit(chat, input)?,
        };
        let value = match side {
            LimitSide::Lower => subscriber.lower_limit,
            LimitSide::Upper => subscriber.upper_limit,
        };
        let reply = if value.is_zero() {
            format!("{} limit cleared.", side.capitalized())
        } else {
            format!(
                "New {} limit: {}",
                side.label(),
                self.formatter.format_amount(value)
            )
        };
        info!("Price limit {} for {}: {}", side.label(), chat, reply);
        Ok(reply)
    }

    fn amount(&self, chat: ChatId, arg: Option<String>) -> Result<String> {
        let store = self.scheduler.store();
        let Some(raw) = arg else {
            return Ok(match store.get_or_create(chat).holding_amount {
                Some(amount) => format!("Current amount: {} BTC", amount.normalize()),
                None => "Amount not set yet.".to_string(),
            });
        };

        let amount: Decimal = parse_decimal(&raw)?;
        let subscriber = store.set_holding_amount(chat, amount)?;
        let reply = format!(
            "New amount: {} BTC",
            subscriber.holding_amount.unwrap_or(amount).normalize()
        );
        info!("Holding amount for {}: {}", chat, reply);
        Ok(reply)
    }
}

/// Sends a command reply on its own task, so a slow chat does not hold up
/// replies to the others.
pub fn spawn_reply(
    notifier: Arc<dyn Notifier>,
    chat: ChatId,
    reply: String,
    send_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(send_timeout, notifier.send_message(chat, &reply)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Reply to {} failed: {}", chat, e),
            Err(_) => warn!("Reply to {} timed out after {:?}", chat, send_timeout),
        }
    })
}
