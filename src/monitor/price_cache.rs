use crate::error::{BitwatchError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::{debug, info, log, Level};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Upstream quote source.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn fetch_price(&self) -> Result<Decimal>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price {
    pub value: Decimal,
    pub fetched_at: DateTime<Local>,
}

/// Last fetched price, shared by the refresh loop and every alert job.
pub struct PriceCache {
    provider: Arc<dyn PriceProvider>,
    current: RwLock<Price>,
    /// Monotonic time of the last successful refresh.
    refreshed_at: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
    escalate_after: u32,
}

/// `warn` below the escalation threshold, `error` from the threshold on.
pub fn failure_level(failures: u32, escalate_after: u32) -> Level {
    if failures >= escalate_after {
        Level::Error
    } else {
        Level::Warn
    }
}

impl PriceCache {
    /// Empty cache holding a zero price. Call [`PriceCache::refresh`] before serving reads.
    pub fn new(provider: Arc<dyn PriceProvider>, escalate_after: u32) -> Self {
        Self {
            provider,
            current: RwLock::new(Price {
                value: Decimal::ZERO,
                fetched_at: Local::now(),
            }),
            refreshed_at: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            escalate_after: escalate_after.max(1),
        }
    }

    pub fn read(&self) -> Price {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when no refresh has succeeded within `max_age`.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match *self.refreshed_at.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(at) => at.elapsed() >= max_age,
            None => true,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Fetches a fresh quote and swaps it in. On failure the previous price stays.
    pub async fn refresh(&self) -> Result<Price> {
        let fetched = self.provider.fetch_price().await.and_then(|value| {
            if value.is_sign_negative() && !value.is_zero() {
                Err(BitwatchError::UpstreamFetch(format!(
                    "provider returned negative price {}",
                    value
                )))
            } else {
                Ok(value)
            }
        });

        match fetched {
            Ok(value) => {
                let price = Price {
                    value,
                    fetched_at: Local::now(),
                };
                let old = {
                    let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
                    std::mem::replace(&mut *current, price)
                };
                *self.refreshed_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
                let failures = self.consecutive_failures.swap(0, Ordering::Relaxed);
                if failures > 0 {
                    info!("Price refresh recovered after {} failed attempt(s)", failures);
                }
                debug!("Old price: {} - new price: {}", old.value, price.value);
                Ok(price)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                log!(
                    failure_level(failures, self.escalate_after),
                    "Price refresh failed ({} in a row): {}",
                    failures,
                    e
                );
                Err(e)
            }
        }
    }
}
