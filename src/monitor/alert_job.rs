use crate::error::BitwatchError;
use crate::format::MessageFormatter;
use crate::monitor::price_cache::PriceCache;
use crate::monitor::subscribers::{Subscriber, SubscriberStore};
use crate::monitor::ChatId;
use crate::notify::Notifier;
use log::{debug, warn};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Delay between registering a job and its first tick.
pub const FIRST_TICK_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Current,
    BelowLimit,
    AboveLimit,
}

/// Decides whether a tick notifies. Limits only filter when both are set;
/// with either side at zero every tick reports the current price.
pub fn evaluate(price: Decimal, subscriber: &Subscriber) -> Option<AlertKind> {
    if subscriber.lower_limit.is_zero() || subscriber.upper_limit.is_zero() {
        Some(AlertKind::Current)
    } else if price < subscriber.lower_limit {
        Some(AlertKind::BelowLimit)
    } else if price > subscriber.upper_limit {
        Some(AlertKind::AboveLimit)
    } else {
        None
    }
}

/// Recurring evaluation for one subscriber.
#[derive(Clone)]
pub struct AlertJob {
    pub subscriber: ChatId,
    pub interval: Duration,
    cache: Arc<PriceCache>,
    store: Arc<SubscriberStore>,
    notifier: Arc<dyn Notifier>,
    formatter: MessageFormatter,
    send_timeout: Duration,
}

impl AlertJob {
    pub fn new(
        subscriber: ChatId,
        interval: Duration,
        cache: Arc<PriceCache>,
        store: Arc<SubscriberStore>,
        notifier: Arc<dyn Notifier>,
        formatter: MessageFormatter,
        send_timeout: Duration,
    ) -> Self {
        Self {
            subscriber,
            interval,
            cache,
            store,
            notifier,
            formatter,
            send_timeout,
        }
    }

    /// Ticks until `cancel` fires. A tick already running is finished first.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + FIRST_TICK_DELAY, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        debug!("Alert job for {} stopped", self.subscriber);
    }

    /// One evaluation cycle. Returns whether a message was delivered.
    pub async fn tick(&self) -> bool {
        let price = self.cache.read();
        let subscriber = self.store.get_or_create(self.subscriber);

        let Some(kind) = evaluate(price.value, &subscriber) else {
            debug!(
                "Price {} inside [{}, {}] for {}, suppressed",
                price.value, subscriber.lower_limit, subscriber.upper_limit, self.subscriber
            );
            return false;
        };

        let text = self
            .formatter
            .alert_message(kind, &price, subscriber.holding_value(price.value));
        let sent = tokio::time::timeout(
            self.send_timeout,
            self.notifier.send_message(self.subscriber, &text),
        )
        .await
        .unwrap_or(Err(BitwatchError::DeliveryTimeout(self.send_timeout)));

        match sent {
            Ok(()) => {
                debug!("{:?} alert sent to {}", kind, self.subscriber);
                true
            }
            Err(e) => {
                warn!("Alert for {} not delivered: {}", self.subscriber, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::subscribers::LimitInput;
    use crate::monitor::testing::{RecordingNotifier, StubProvider};
    use rust_decimal_macros::dec;

    const CHAT: ChatId = ChatId(42);

    fn subscriber(lower: Decimal, upper: Decimal) -> Subscriber {
        Subscriber {
            lower_limit: lower,
            upper_limit: upper,
            ..Subscriber::new(CHAT)
        }
    }

    #[test]
    fn no_limits_always_notify() {
        let sub = subscriber(Decimal::ZERO, Decimal::ZERO);
        for price in [dec!(0), dec!(1), dec!(50000), dec!(1000000)] {
            assert_eq!(evaluate(price, &sub), Some(AlertKind::Current));
        }
    }

    #[test]
    fn one_sided_limit_still_notifies_unconditionally() {
        let lower_only = subscriber(dec!(45000), Decimal::ZERO);
        assert_eq!(evaluate(dec!(50000), &lower_only), Some(AlertKind::Current));
        assert_eq!(evaluate(dec!(40000), &lower_only), Some(AlertKind::Current));

        let upper_only = subscriber(Decimal::ZERO, dec!(55000));
        assert_eq!(evaluate(dec!(60000), &upper_only), Some(AlertKind::Current));
    }

    #[test]
    fn both_limits_filter() {
        let sub = subscriber(dec!(45000), dec!(55000));
        assert_eq!(evaluate(dec!(50000), &sub), None);
        assert_eq!(evaluate(dec!(45000), &sub), None);
        assert_eq!(evaluate(dec!(55000), &sub), None);
        assert_eq!(evaluate(dec!(44000), &sub), Some(AlertKind::BelowLimit));
        assert_eq!(evaluate(dec!(56000), &sub), Some(AlertKind::AboveLimit));
    }

    async fn job_with(
        price: Decimal,
    ) -> (AlertJob, Arc<StubProvider>, Arc<SubscriberStore>, Arc<RecordingNotifier>) {
        let provider = Arc::new(StubProvider::new(price));
        let cache = Arc::new(PriceCache::new(provider.clone(), 3));
        cache.refresh().await.unwrap();
        let store = Arc::new(SubscriberStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let job = AlertJob::new(
            CHAT,
            Duration::from_secs(10),
            cache,
            store.clone(),
            notifier.clone(),
            MessageFormatter::new("eur"),
            Duration::from_secs(2),
        );
        (job, provider, store, notifier)
    }

    #[tokio::test]
    async fn tick_creates_missing_subscriber_and_notifies() {
        let (job, _, store, notifier) = job_with(dec!(50000)).await;
        assert!(store.get(CHAT).is_none());

        assert!(job.tick().await);
        assert!(store.get(CHAT).is_some());
        let sent = notifier.sent_to(CHAT);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("Bitcoin price: 50.000,00 €\nUpdated: "));
    }

    #[tokio::test]
    async fn tick_appends_holding_value() {
        let (job, _, store, notifier) = job_with(dec!(50000)).await;
        store.set_holding_amount(CHAT, dec!(0.5)).unwrap();

        job.tick().await;
        let sent = notifier.sent_to(CHAT);
        assert!(sent[0].contains("\nHolding value: 25.000,00 €\n"));
    }

    #[tokio::test]
    async fn oversized_holding_still_alerts_without_value_line() {
        let (job, _, store, notifier) = job_with(dec!(50000)).await;
        store.set_holding_amount(CHAT, Decimal::MAX).unwrap();

        assert!(job.tick().await);
        let sent = notifier.sent_to(CHAT);
        assert!(sent[0].starts_with("Bitcoin price: 50.000,00 €\nUpdated: "));
        assert!(!sent[0].contains("Holding value"));
    }

    #[tokio::test]
    async fn tick_inside_limits_is_suppressed() {
        let (job, _, store, notifier) = job_with(dec!(50000)).await;
        store.set_lower_limit(CHAT, LimitInput::PerUnit(dec!(45000))).unwrap();
        store.set_upper_limit(CHAT, LimitInput::PerUnit(dec!(55000))).unwrap();

        assert!(!job.tick().await);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_send_is_swallowed() {
        let (job, _, _, notifier) = job_with(dec!(50000)).await;
        notifier.fail(true);
        assert!(!job.tick().await);

        notifier.fail(false);
        assert!(job.tick().await);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_send_times_out() {
        let (job, _, _, notifier) = job_with(dec!(50000)).await;
        notifier.hang(true);
        let started = Instant::now();
        assert!(!job.tick().await);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
