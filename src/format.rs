//! Currency and timestamp rendering for outgoing messages.

use crate::monitor::alert_job::AlertKind;
use crate::monitor::price_cache::Price;
use chrono::{DateTime, Local};
use num_format::{Locale, ToFormattedString};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

#[derive(Debug, Clone)]
pub struct MessageFormatter {
    code: String,
    symbol: String,
}

impl MessageFormatter {
    pub fn new(currency: &str) -> Self {
        let code = currency.trim().to_uppercase();
        let symbol = match code.as_str() {
            "EUR" => "€",
            "USD" => "$",
            "GBP" => "£",
            "JPY" => "¥",
            other => other,
        }
        .to_string();
        Self { code, symbol }
    }

    pub fn currency_code(&self) -> &str {
        &self.code
    }

    pub fn currency_symbol(&self) -> &str {
        &self.symbol
    }

    /// `50000` -> `50.000,00 €`
    pub fn format_amount(&self, value: Decimal) -> String {
        let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let abs = rounded.abs();
        let whole = abs.trunc();
        let cents = ((abs - whole) * Decimal::ONE_HUNDRED).to_u32().unwrap_or(0);
        let whole = match whole.to_u128() {
            Some(w) => w.to_formatted_string(&Locale::de),
            None => whole.to_string(),
        };
        let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
            "-"
        } else {
            ""
        };
        format!("{}{},{:02} {}", sign, whole, cents, self.symbol)
    }

    pub fn format_timestamp(timestamp: &DateTime<Local>) -> String {
        timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn alert_message(
        &self,
        kind: AlertKind,
        price: &Price,
        holding_value: Option<Decimal>,
    ) -> String {
        let headline = match kind {
            AlertKind::Current => "Bitcoin price",
            AlertKind::BelowLimit => "Bitcoin price below limit",
            AlertKind::AboveLimit => "Bitcoin price above limit",
        };
        let mut msg = format!("{}: {}", headline, self.format_amount(price.value));
        if let Some(value) = holding_value {
            msg.push_str(&format!("\nHolding value: {}", self.format_amount(value)));
        }
        msg.push_str(&format!(
            "\nUpdated: {}",
            Self::format_timestamp(&price.fetched_at)
        ));
        msg
    }
}
