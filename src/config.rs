//! Environment based configuration.

use crate::error::{BitwatchError, Result};
use log::info;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_COINGECKO_URL: &str = "https://api.coingecko.com/api/v3";
const DEFAULT_TELEGRAM_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    /// Lower-case ISO code, e.g. `eur`.
    pub currency: String,
    pub refresh_interval: Duration,
    pub default_alert_interval: Duration,
    pub refresh_warmup: Duration,
    pub send_timeout: Duration,
    pub fetch_timeout: Duration,
    pub failure_escalation: u32,
    pub coingecko_url: String,
    pub telegram_url: String,
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let telegram_token = lookup("BITWATCH_TELEGRAM_TOKEN")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                BitwatchError::Config("BITWATCH_TELEGRAM_TOKEN is not set".to_string())
            })?;

        let currency = lookup("BITWATCH_CURRENCY")
            .map(|v| v.trim().to_lowercase())
            .unwrap_or_else(|| "eur".to_string());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(BitwatchError::Config(format!(
                "BITWATCH_CURRENCY must be a 3 letter ISO code, got '{}'",
                currency
            )));
        }

        Ok(Self {
            telegram_token,
            currency,
            refresh_interval: env_var_secs(&lookup, "BITWATCH_REFRESH_INTERVAL_SECS", 60)?,
            default_alert_interval: env_var_secs(&lookup, "BITWATCH_ALERT_INTERVAL_SECS", 10)?,
            refresh_warmup: Duration::from_secs(env_var_parse(
                &lookup,
                "BITWATCH_REFRESH_WARMUP_SECS",
                5u64,
            )?),
            send_timeout: env_var_secs(&lookup, "BITWATCH_SEND_TIMEOUT_SECS", 10)?,
            fetch_timeout: env_var_secs(&lookup, "BITWATCH_FETCH_TIMEOUT_SECS", 10)?,
            failure_escalation: env_var_parse(&lookup, "BITWATCH_FAILURE_ESCALATION", 3u32)?
                .max(1),
            coingecko_url: lookup("BITWATCH_COINGECKO_URL")
                .unwrap_or_else(|| DEFAULT_COINGECKO_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            telegram_url: lookup("BITWATCH_TELEGRAM_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn log_summary(&self) {
        info!(
            "Config: currency={} refresh={:?} alert={:?} warmup={:?} send_timeout={:?}",
            self.currency,
            self.refresh_interval,
            self.default_alert_interval,
            self.refresh_warmup,
            self.send_timeout
        );
    }
}

fn env_var_parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BitwatchError::Config(format!("{} has an invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}

fn env_var_secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = env_var_parse(lookup, key, default)?;
    if secs == 0 {
        return Err(BitwatchError::Config(format!("{} must be greater than 0", key)));
    }
    Ok(Duration::from_secs(secs))
}
