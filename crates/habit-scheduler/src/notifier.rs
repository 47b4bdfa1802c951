use std::future::Future;

use habit_telegram::TelegramClient;
use tracing::info;

/// Outbound channel for reminder texts.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, chat_id: i64, text: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl Notifier for TelegramClient {
    async fn notify(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        self.send_message(chat_id, text).await?;
        Ok(())
    }
}

/// Writes reminders to the log instead of sending them. Used when no bot
/// token is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        info!(chat_id, "Reminder (not delivered): {}", text);
        Ok(())
    }
}
