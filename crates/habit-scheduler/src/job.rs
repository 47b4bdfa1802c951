use chrono::{DateTime, Duration, FixedOffset, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use habit_types::ReminderTime;

/// Everything a firing reminder needs, so firing never touches the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderJob {
    pub id: String,
    pub chat_id: i64,
    pub habit_name: String,
    pub at: ReminderTime,
}

impl ReminderJob {
    pub fn new(user_id: Uuid, chat_id: i64, habit_name: &str, at: ReminderTime) -> Self {
        Self {
            id: job_id(user_id, habit_name),
            chat_id,
            habit_name: habit_name.to_string(),
            at,
        }
    }

    pub fn message(&self) -> String {
        format!("⏰ Reminder: time to do '{}'!", self.habit_name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("reminder job {0} is already registered")]
    Duplicate(String),
    #[error("scheduler has been shut down")]
    Stopped,
    #[error("no tokio runtime available to run reminder jobs")]
    NoRuntime,
    #[error("reminder registration failed: {0}")]
    Rejected(String),
}

/// Registers and cancels reminder jobs.
///
/// Implementations must not block: registration only books the job, the
/// actual firing happens in the background.
pub trait ReminderScheduler: Send + Sync {
    /// Book `job`. Fails with [`SchedulerError::Duplicate`] when a job with
    /// the same id is already registered.
    fn register(&self, job: ReminderJob) -> Result<(), SchedulerError>;

    /// Remove a job. Unknown ids are tolerated; returns whether a job was
    /// actually removed.
    fn cancel(&self, job_id: &str) -> bool;

    fn is_registered(&self, job_id: &str) -> bool;
}

/// Stable job id for the reminder of habit `habit_name` owned by `user_id`.
pub fn job_id(user_id: Uuid, habit_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(habit_name.as_bytes());
    let digest = hasher.finalize();
    format!("reminder-{}", hex::encode(&digest[..12]))
}

/// First instant strictly after `now` at which local time in `tz` reads `at`.
pub fn next_fire(now: DateTime<Utc>, at: ReminderTime, tz: FixedOffset) -> DateTime<Utc> {
    let offset = Duration::seconds(tz.local_minus_utc().into());
    let today = now.with_timezone(&tz).date_naive();
    let candidate = (today.and_time(at.naive_time()) - offset).and_utc();
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}
