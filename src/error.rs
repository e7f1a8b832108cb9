use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BitwatchError {
    #[error("Price fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("{0}")]
    InvalidInput(#[from] InputError),

    #[error("Message delivery failed: {0}")]
    DeliverySend(String),

    #[error("Message delivery timed out after {0:?}")]
    DeliveryTimeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Rejected subscriber input. The `Display` text is sent back to the chat verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("'{0}' is not a number.")]
    NotANumber(String),

    #[error("Negative values are not allowed.")]
    Negative,

    #[error("Amount not yet set. Use /amount <number> first.")]
    AmountNotSet,

    #[error("Amount is zero, cannot convert a total into a per-coin limit.")]
    ZeroAmount,

    #[error("Interval must be a whole number of seconds >= 1, got '{0}'.")]
    InvalidInterval(String),

    #[error("Value is out of range.")]
    Overflow,
}

pub type Result<T> = std::result::Result<T, BitwatchError>;
