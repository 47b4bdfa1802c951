use std::sync::Arc;

use chrono::FixedOffset;
use tracing::{info, warn};

use habit_api::AppState;
use habit_scheduler::{CronScheduler, LogNotifier, ReminderJob, ReminderScheduler};
use habit_telegram::TelegramClient;

/// The production scheduler, delivering through Telegram when a bot token
/// is configured and to the log otherwise.
pub enum Reminders {
    Telegram(Arc<CronScheduler<TelegramClient>>),
    Log(Arc<CronScheduler<LogNotifier>>),
}

impl Reminders {
    pub fn start(telegram_token: Option<&str>, tz: FixedOffset) -> anyhow::Result<Self> {
        Ok(match telegram_token {
            Some(token) => {
                let client = TelegramClient::new(token)?;
                Self::Telegram(Arc::new(CronScheduler::new(client, tz)?))
            }
            None => {
                warn!("TELEGRAM_BOT_TOKEN not set; reminders will only be logged");
                Self::Log(Arc::new(CronScheduler::new(LogNotifier, tz)?))
            }
        })
    }

    pub fn scheduler(&self) -> Arc<dyn ReminderScheduler> {
        match self {
            Self::Telegram(s) => s.clone(),
            Self::Log(s) => s.clone(),
        }
    }

    pub fn shutdown(&self) {
        match self {
            Self::Telegram(s) => s.shutdown(),
            Self::Log(s) => s.shutdown(),
        }
    }
}

/// Book a job for every active habit of a linked account. Jobs live only in
/// memory, so this runs on every start. Stored job references are brought
/// in line with what was actually booked.
pub async fn restore(state: &AppState) -> anyhow::Result<usize> {
    let db_state = state.clone();
    let targets = tokio::task::spawn_blocking(move || db_state.db.reminder_targets()).await??;

    let mut booked = 0;
    let mut stale = Vec::new();
    for (habit, chat_id) in targets {
        let job = ReminderJob::new(habit.user_id, chat_id, &habit.name, habit.reminder_time);
        let job_id = job.id.clone();
        match state.scheduler.register(job) {
            Ok(()) => {
                booked += 1;
                if habit.job_id.as_deref() != Some(job_id.as_str()) {
                    stale.push((habit.id, Some(job_id)));
                }
            }
            Err(e) => {
                warn!(habit_id = %habit.id, "Could not restore reminder: {}", e);
                if habit.job_id.is_some() {
                    stale.push((habit.id, None));
                }
            }
        }
    }

    if !stale.is_empty() {
        let db_state = state.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            for (habit_id, job_id) in &stale {
                db_state.db.set_job_id(*habit_id, job_id.as_deref())?;
            }
            Ok(())
        })
        .await??;
    }

    info!("Restored {} reminder jobs", booked);
    Ok(booked)
}
