//! Chat command parsing.

use crate::error::InputError;
use crate::monitor::subscribers::LimitInput;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

pub const USAGE: &str = "\
This bot sends the current Bitcoin price at regular intervals.
Commands:
/subscribe [seconds] - start price alerts (alias /set)
/unsubscribe - stop price alerts (alias /unset)
/set_lower <number> - lower limit per coin (alias /down). Append the currency, e.g. /down 20000€, to give the value of your whole holding instead.
/set_upper <number> - upper limit per coin (alias /up). Currency suffix works the same way.
/set_amount <number> - how many coins you hold (alias /amount), e.g. 0.004
/now - current price
Alerts are only filtered when both limits are set; 0 clears a limit.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Now,
    Subscribe(Option<String>),
    Unsubscribe,
    SetLower(Option<String>),
    SetUpper(Option<String>),
    SetAmount(Option<String>),
    Unknown(String),
    Echo(String),
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let Some(body) = trimmed.strip_prefix('/') else {
            return Command::Echo(text.to_string());
        };

        let mut parts = body.splitn(2, char::is_whitespace);
        let head = parts.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        let arg = parts
            .next()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        match name.as_str() {
            "start" | "help" | "info" => Command::Help,
            "now" => Command::Now,
            "subscribe" | "set" => Command::Subscribe(arg),
            "unsubscribe" | "unset" => Command::Unsubscribe,
            "set-lower" | "set_lower" | "down" => Command::SetLower(arg),
            "set-upper" | "set_upper" | "up" => Command::SetUpper(arg),
            "set-amount" | "set_amount" | "amount" => Command::SetAmount(arg),
            _ => Command::Unknown(name),
        }
    }
}

pub fn parse_decimal(raw: &str) -> Result<Decimal, InputError> {
    let normalized = raw.trim().replace(',', ".");
    Decimal::from_str(&normalized)
        .or_else(|_| Decimal::from_scientific(&normalized))
        .map_err(|_| InputError::NotANumber(raw.trim().to_string()))
        .and_then(|value| {
            if value.is_sign_negative() && !value.is_zero() {
                Err(InputError::Negative)
            } else {
                Ok(value)
            }
        })
}

/// A trailing currency symbol or ISO code marks a total holding value.
pub fn parse_limit(raw: &str, symbol: &str, code: &str) -> Result<LimitInput, InputError> {
    let trimmed = raw.trim();
    let strip_suffix = |s: &str, suffix: &str| -> Option<String> {
        if suffix.is_empty() || s.len() < suffix.len() {
            return None;
        }
        let split = s.len() - suffix.len();
        if !s.is_char_boundary(split) || !s[split..].eq_ignore_ascii_case(suffix) {
            return None;
        }
        Some(s[..split].to_string())
    };

    if let Some(amount) = strip_suffix(trimmed, symbol).or_else(|| strip_suffix(trimmed, code)) {
        return parse_decimal(&amount).map(LimitInput::Total);
    }
    if let Some(amount) = trimmed.strip_prefix(symbol).filter(|_| !symbol.is_empty()) {
        return parse_decimal(amount).map(LimitInput::Total);
    }
    parse_decimal(trimmed).map(LimitInput::PerUnit)
}

pub fn parse_interval(raw: &str) -> Result<Duration, InputError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs >= 1 => Ok(Duration::from_secs(secs)),
        _ => Err(InputError::InvalidInterval(raw.trim().to_string())),
    }
}
