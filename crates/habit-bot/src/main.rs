mod api;
mod dialogue;
#[cfg(test)]
mod fake;
mod handler;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use habit_telegram::TelegramClient;

use crate::api::{HabitApi, HttpApi};
use crate::handler::Bot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "habit=debug".into()),
        )
        .init();

    let token = std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
    if token.trim().is_empty() {
        eprintln!("FATAL: TELEGRAM_BOT_TOKEN is not set.");
        std::process::exit(1);
    }
    let api_url = std::env::var("HABIT_API_URL").unwrap_or_else(|_| "http://localhost:8000".into());

    let telegram = TelegramClient::new(&token)?;
    let bot = Arc::new(Bot::new(HttpApi::new(&api_url)?, telegram.clone()));
    info!("Habit bot polling Telegram (API at {})", api_url);

    tokio::select! {
        _ = poll(bot, telegram) => {}
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
    }
    Ok(())
}

async fn poll<A: HabitApi>(bot: Arc<Bot<A>>, telegram: TelegramClient) {
    let mut offset = 0;
    loop {
        match telegram.get_updates(offset).await {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    bot.dispatch(update).await;
                }
            }
            Err(e) => {
                warn!("getUpdates failed: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}
