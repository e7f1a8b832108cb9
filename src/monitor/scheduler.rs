//! Lifecycle of the price refresh loop and the per-subscriber alert jobs.
//!
//! The refresh loop is spawned once and afterwards only paused and resumed
//! through a `watch` channel. Alert jobs are tracked in a table keyed by
//! chat, so a chat never has more than one job ticking.

use crate::format::MessageFormatter;
use crate::monitor::alert_job::AlertJob;
use crate::monitor::price_cache::PriceCache;
use crate::monitor::subscribers::SubscriberStore;
use crate::monitor::ChatId;
use crate::notify::Notifier;
use futures::future::join_all;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub refresh_interval: Duration,
    /// Delay before the first periodic refresh after the loop is spawned.
    pub refresh_warmup: Duration,
    pub send_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            refresh_warmup: Duration::from_secs(5),
            send_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Loop never spawned.
    Stopped,
    Running,
    /// Loop alive but not fetching; the cache keeps serving the last price.
    Paused,
}

struct Subscription {
    interval: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct RefreshControl {
    active: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    cache: Arc<PriceCache>,
    store: Arc<SubscriberStore>,
    notifier: Arc<dyn Notifier>,
    formatter: MessageFormatter,
    settings: SchedulerSettings,
    jobs: Mutex<HashMap<ChatId, Subscription>>,
    refresh: Mutex<RefreshControl>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        cache: Arc<PriceCache>,
        store: Arc<SubscriberStore>,
        notifier: Arc<dyn Notifier>,
        formatter: MessageFormatter,
        settings: SchedulerSettings,
    ) -> Self {
        let (active, _) = watch::channel(false);
        Self {
            cache,
            store,
            notifier,
            formatter,
            settings,
            jobs: Mutex::new(HashMap::new()),
            refresh: Mutex::new(RefreshControl {
                active,
                handle: None,
            }),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<SubscriberStore> {
        &self.store
    }

    /// Spawns the refresh loop, or resumes it when paused. No-op when running.
    pub async fn start(&self) {
        let mut refresh = self.refresh.lock().await;
        if refresh.handle.is_none() {
            info!(
                "Starting price refresh every {:?}",
                self.settings.refresh_interval
            );
            let rx = refresh.active.subscribe();
            refresh.active.send_replace(true);
            refresh.handle = Some(tokio::spawn(run_refresh_loop(
                self.cache.clone(),
                self.settings.refresh_interval,
                self.settings.refresh_warmup,
                rx,
                self.shutdown.clone(),
            )));
        } else if !*refresh.active.borrow() {
            info!("Resuming price refresh");
            refresh.active.send_replace(true);
        }
    }

    pub async fn refresh_state(&self) -> RefreshState {
        let refresh = self.refresh.lock().await;
        let active = *refresh.active.borrow();
        match (&refresh.handle, active) {
            (None, _) => RefreshState::Stopped,
            (Some(_), true) => RefreshState::Running,
            (Some(_), false) => RefreshState::Paused,
        }
    }

    /// Replaces any job the chat already has and makes sure prices are refreshed.
    pub async fn subscribe(&self, chat: ChatId, interval: Duration) {
        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.remove(&chat) {
            debug!(
                "Replacing alert job for {} (was every {:?})",
                chat, previous.interval
            );
            previous.cancel.cancel();
        }
        self.store.get_or_create(chat);

        let job = AlertJob::new(
            chat,
            interval,
            self.cache.clone(),
            self.store.clone(),
            self.notifier.clone(),
            self.formatter.clone(),
            self.settings.send_timeout,
        );
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(job.run(cancel.clone()));
        jobs.insert(
            chat,
            Subscription {
                interval,
                cancel,
                handle,
            },
        );
        info!("Alert job for {} every {:?} ({} active)", chat, interval, jobs.len());

        self.start().await;
    }

    /// Cancels the chat's job. Returns whether there was one.
    pub async fn unsubscribe(&self, chat: ChatId) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(subscription) = jobs.remove(&chat) else {
            return false;
        };
        subscription.cancel.cancel();
        info!("Alert job for {} cancelled ({} active)", chat, jobs.len());

        if jobs.is_empty() {
            self.pause().await;
        }
        true
    }

    pub async fn is_subscribed(&self, chat: ChatId) -> bool {
        self.jobs.lock().await.contains_key(&chat)
    }

    pub async fn active_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }

    async fn pause(&self) {
        let refresh = self.refresh.lock().await;
        if refresh.handle.is_some() && *refresh.active.borrow() {
            info!("No alert jobs left, pausing price refresh");
            refresh.active.send_replace(false);
        }
    }

    /// Cancels every job and the refresh loop and waits for their tasks.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles: Vec<JoinHandle<()>> = self
            .jobs
            .lock()
            .await
            .drain()
            .map(|(_, subscription)| subscription.handle)
            .collect();
        if let Some(handle) = self.refresh.lock().await.handle.take() {
            handles.push(handle);
        }
        join_all(handles).await;
        info!("Scheduler stopped");
    }
}

async fn run_refresh_loop(
    cache: Arc<PriceCache>,
    period: Duration,
    warmup: Duration,
    mut active: watch::Receiver<bool>,
    shutdown: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + warmup, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Spawned long after startup: the warm-up would leave jobs on an old price.
    if cache.is_stale(period) {
        let _ = cache.refresh().await;
        ticker.reset();
    }

    loop {
        if !*active.borrow_and_update() {
            debug!("Price refresh paused");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                resumed = async { active.wait_for(|on| *on).await.is_ok() } => {
                    if !resumed {
                        break;
                    }
                }
            }
            if cache.is_stale(period) {
                debug!("Cached price is stale, refreshing on resume");
                let _ = cache.refresh().await;
            }
            ticker.reset();
            continue;
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = active.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                // Failures are logged by the cache; the next tick retries.
                let _ = cache.refresh().await;
            }
        }
    }
    debug!("Price refresh loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::subscribers::LimitInput;
    use crate::monitor::testing::{RecordingNotifier, StubProvider};
    use rust_decimal_macros::dec;
    use tokio::time::sleep;

    const ALICE: ChatId = ChatId(1);
    const BOB: ChatId = ChatId(2);

    struct Fixture {
        scheduler: Scheduler,
        provider: Arc<StubProvider>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn fixture() -> Fixture {
        let provider = Arc::new(StubProvider::new(dec!(50000)));
        let cache = Arc::new(PriceCache::new(provider.clone(), 3));
        cache.refresh().await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Scheduler::new(
            cache,
            Arc::new(SubscriberStore::new()),
            notifier.clone(),
            MessageFormatter::new("eur"),
            SchedulerSettings::default(),
        );
        Fixture {
            scheduler,
            provider,
            notifier,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let f = fixture().await;
        assert_eq!(f.scheduler.refresh_state().await, RefreshState::Stopped);
        f.scheduler.start().await;
        f.scheduler.start().await;
        assert_eq!(f.scheduler.refresh_state().await, RefreshState::Running);

        // warmup 5s, then one refresh per minute
        sleep(Duration::from_secs(66)).await;
        assert_eq!(f.provider.calls(), 1 + 2);
        f.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_twice_keeps_one_job() {
        let f = fixture().await;
        f.scheduler.subscribe(ALICE, Duration::from_secs(10)).await;
        f.scheduler.subscribe(ALICE, Duration::from_secs(10)).await;
        assert_eq!(f.scheduler.active_jobs().await, 1);
        assert_eq!(f.scheduler.refresh_state().await, RefreshState::Running);

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(f.notifier.sent_to(ALICE).len(), 1);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(f.notifier.sent_to(ALICE).len(), 2);
        f.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_unknown_chat_leaves_refresh_alone() {
        let f = fixture().await;
        assert!(!f.scheduler.unsubscribe(ALICE).await);
        assert_eq!(f.scheduler.refresh_state().await, RefreshState::Stopped);

        f.scheduler.subscribe(BOB, Duration::from_secs(10)).await;
        assert!(!f.scheduler.unsubscribe(ALICE).await);
        assert_eq!(f.scheduler.refresh_state().await, RefreshState::Running);
        f.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn last_unsubscribe_pauses_and_subscribe_resumes() {
        let f = fixture().await;
        f.scheduler.subscribe(ALICE, Duration::from_secs(10)).await;
        f.scheduler.subscribe(BOB, Duration::from_secs(10)).await;

        assert!(f.scheduler.unsubscribe(ALICE).await);
        assert_eq!(f.scheduler.refresh_state().await, RefreshState::Running);
        assert!(f.scheduler.unsubscribe(BOB).await);
        assert_eq!(f.scheduler.refresh_state().await, RefreshState::Paused);
        assert!(!f.scheduler.is_subscribed(BOB).await);

        let calls = f.provider.calls();
        sleep(Duration::from_secs(300)).await;
        assert_eq!(f.provider.calls(), calls);
        let before = f.scheduler.cache().read();
        assert_eq!(before.value, dec!(50000));

        f.scheduler.subscribe(BOB, Duration::from_secs(10)).await;
        assert_eq!(f.scheduler.refresh_state().await, RefreshState::Running);
        sleep(Duration::from_secs(61)).await;
        assert!(f.provider.calls() > calls);
        f.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn resume_after_long_pause_refreshes_before_first_alert() {
        let f = fixture().await;
        f.scheduler.subscribe(ALICE, Duration::from_secs(10)).await;
        sleep(Duration::from_secs(2)).await;
        f.scheduler.unsubscribe(ALICE).await;
        let calls = f.provider.calls();

        f.provider.set_price(dec!(30000));
        sleep(Duration::from_secs(3600)).await;
        assert_eq!(f.provider.calls(), calls);

        f.scheduler.subscribe(ALICE, Duration::from_secs(10)).await;
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(f.provider.calls(), calls + 1);
        let sent = f.notifier.sent_to(ALICE);
        assert!(sent
            .last()
            .unwrap()
            .starts_with("Bitcoin price: 30.000,00 €"));
        f.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_subscription_long_after_startup_refreshes_first() {
        let f = fixture().await;
        f.provider.set_price(dec!(30000));
        sleep(Duration::from_secs(3600)).await;

        f.scheduler.subscribe(ALICE, Duration::from_secs(10)).await;
        sleep(Duration::from_millis(1500)).await;
        let sent = f.notifier.sent_to(ALICE);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("Bitcoin price: 30.000,00 €"));
        f.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_job_stops_ticking() {
        let f = fixture().await;
        f.scheduler.subscribe(ALICE, Duration::from_secs(10)).await;
        sleep(Duration::from_millis(1500)).await;
        f.scheduler.unsubscribe(ALICE).await;
        sleep(Duration::from_secs(60)).await;
        assert_eq!(f.notifier.sent_to(ALICE).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_read_their_own_limits() {
        let f = fixture().await;
        let store = f.scheduler.store().clone();
        store.set_lower_limit(ALICE, LimitInput::PerUnit(dec!(45000))).unwrap();
        store.set_upper_limit(ALICE, LimitInput::PerUnit(dec!(55000))).unwrap();

        f.scheduler.subscribe(ALICE, Duration::from_secs(10)).await;
        f.scheduler.subscribe(BOB, Duration::from_secs(10)).await;
        sleep(Duration::from_millis(1500)).await;

        assert!(f.notifier.sent_to(ALICE).is_empty());
        assert_eq!(f.notifier.sent_to(BOB).len(), 1);
        f.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_transport_does_not_stop_other_jobs() {
        let f = fixture().await;
        f.notifier.fail(true);
        f.scheduler.subscribe(ALICE, Duration::from_secs(10)).await;
        sleep(Duration::from_millis(1500)).await;
        f.notifier.fail(false);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(f.notifier.sent_to(ALICE).len(), 1);
        assert!(f.scheduler.is_subscribed(ALICE).await);
        f.scheduler.shutdown().await;
    }
}
