//! Stub collaborators shared by the unit tests.

use crate::error::{BitwatchError, Result};
use crate::monitor::price_cache::PriceProvider;
use crate::monitor::ChatId;
use crate::notify::Notifier;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub(crate) struct StubProvider {
    price: Mutex<Decimal>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StubProvider {
    pub(crate) fn new(price: Decimal) -> Self {
        Self {
            price: Mutex::new(price),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_price(&self, price: Decimal) {
        *self.price.lock().unwrap() = price;
    }

    pub(crate) fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceProvider for StubProvider {
    async fn fetch_price(&self) -> Result<Decimal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BitwatchError::UpstreamFetch("stub outage".to_string()));
        }
        Ok(*self.price.lock().unwrap())
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(ChatId, String)>>,
    failing: AtomicBool,
    hanging: AtomicBool,
    stalled: Mutex<Option<ChatId>>,
}

impl RecordingNotifier {
    pub(crate) fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_to(&self, chat: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| *to == chat)
            .map(|(_, text)| text)
            .collect()
    }

    pub(crate) fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn hang(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Sends to `chat` never complete; other chats are unaffected.
    pub(crate) fn stall_chat(&self, chat: ChatId) {
        *self.stalled.lock().unwrap() = Some(chat);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<()> {
        let stalled = *self.stalled.lock().unwrap() == Some(chat);
        if stalled || self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(BitwatchError::DeliverySend("stub transport down".to_string()));
        }
        self.sent.lock().unwrap().push((chat, text.to_string()));
        Ok(())
    }
}
