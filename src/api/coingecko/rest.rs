use crate::error::{BitwatchError, Result};
use crate::monitor::price_cache::PriceProvider;
use async_trait::async_trait;
use log::debug;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

const COIN_ID: &str = "bitcoin";

pub struct CoinGeckoClient {
    client: reqwest::Client,
    base_url: String,
    currency: String,
}

impl CoinGeckoClient {
    pub fn new(base_url: &str, currency: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            currency: currency.to_lowercase(),
        })
    }
}

#[async_trait]
impl PriceProvider for CoinGeckoClient {
    async fn fetch_price(&self) -> Result<Decimal> {
        let url = format!("{}/simple/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("ids", COIN_ID), ("vs_currencies", self.currency.as_str())])
            .send()
            .await
            .map_err(|e| BitwatchError::UpstreamFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BitwatchError::UpstreamFetch(format!(
                "{} returned {}",
                url, status
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| BitwatchError::UpstreamFetch(e.to_string()))?;
        debug!("CoinGecko response: {}", body);
        parse_simple_price(&body, COIN_ID, &self.currency)
    }
}

/// Extracts `body[coin][currency]` from a `/simple/price` response.
fn parse_simple_price(body: &str, coin: &str, currency: &str) -> Result<Decimal> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| BitwatchError::UpstreamFetch(format!("malformed response: {}", e)))?;
    let number = json
        .get(coin)
        .and_then(|quotes| quotes.get(currency))
        .and_then(|quote| match quote {
            Value::Number(n) => Some(n),
            _ => None,
        })
        .ok_or_else(|| {
            BitwatchError::UpstreamFetch(format!("no {} quote for {} in response", currency, coin))
        })?;

    let raw = number.to_string();
    let value = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| BitwatchError::UpstreamFetch(format!("unusable price '{}'", raw)))?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(BitwatchError::UpstreamFetch(format!("negative price {}", value)));
    }
    Ok(value)
}
