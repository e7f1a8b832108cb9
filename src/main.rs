use bitwatch::api::coingecko::rest::CoinGeckoClient;
use bitwatch::api::telegram::bot::TelegramBot;
use bitwatch::bot::handler::{spawn_reply, CommandHandler, InboundMessage};
use bitwatch::config::Config;
use bitwatch::format::MessageFormatter;
use bitwatch::monitor::price_cache::PriceCache;
use bitwatch::monitor::scheduler::{Scheduler, SchedulerSettings};
use bitwatch::monitor::subscribers::SubscriberStore;
use env_logger::{Builder, Env};
use log::{info, LevelFilter};
use std::error::Error;
use std::io::Write;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Configure logger; RUST_LOG still wins over the defaults below
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("bitwatch", LevelFilter::Debug)
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .parse_env(Env::default())
        .format(|buf, record| {
            let ts = chrono::Local::now().format("%H:%M:%S%.3f");
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                ts,
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();

    info!("Starting bitwatch...");
    let config = Config::from_env()?;
    config.log_summary();

    let provider = Arc::new(CoinGeckoClient::new(
        &config.coingecko_url,
        &config.currency,
        config.fetch_timeout,
    )?);
    let cache = Arc::new(PriceCache::new(provider, config.failure_escalation));
    // Nobody may read an unfetched price
    let first = cache.refresh().await?;
    info!("Initial price: {}", first.value);

    let bot = Arc::new(TelegramBot::new(&config.telegram_url, &config.telegram_token)?);
    let formatter = MessageFormatter::new(&config.currency);
    let scheduler = Arc::new(Scheduler::new(
        cache,
        Arc::new(SubscriberStore::new()),
        bot.clone(),
        formatter.clone(),
        SchedulerSettings {
            refresh_interval: config.refresh_interval,
            refresh_warmup: config.refresh_warmup,
            send_timeout: config.send_timeout,
        },
    ));
    let handler = CommandHandler::new(scheduler.clone(), formatter, config.default_alert_interval);

    // Create channels
    let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::channel::<InboundMessage>(100);

    // Start Telegram polling
    let poll_handle = tokio::spawn({
        let bot = bot.clone();
        async move {
            if let Err(e) = bot.poll_updates(inbound_tx).await {
                log::error!("Telegram polling failed: {}", e);
            }
        }
    });

    // Answer commands
    let dispatch_handle = {
        let send_timeout = config.send_timeout;
        tokio::spawn(async move {
            // Commands are applied in arrival order; only the sends overlap.
            while let Some(message) = inbound_rx.recv().await {
                let reply = handler.handle(&message).await;
                spawn_reply(bot.clone(), message.chat, reply, send_timeout);
            }
        })
    };

    tokio::select! {
        _ = poll_handle => {},
        _ = dispatch_handle => {},
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    };

    scheduler.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
