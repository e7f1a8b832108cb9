pub mod coingecko;
pub mod telegram;
