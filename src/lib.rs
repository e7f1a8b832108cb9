pub mod api;
pub mod bot;
pub mod config;
pub mod error;
pub mod format;
pub mod monitor;
pub mod notify;
