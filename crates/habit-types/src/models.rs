use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reminder::ReminderTime;
use crate::streak::Progress;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub telegram_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub reminder_time: ReminderTime,
    pub completion_count: u32,
    pub streak: u32,
    pub last_completed: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Habit {
    pub fn progress(&self) -> Progress {
        Progress {
            completion_count: self.completion_count,
            streak: self.streak,
            last_completed: self.last_completed,
        }
    }
}
