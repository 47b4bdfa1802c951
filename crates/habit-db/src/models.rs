//! Database row types. These carry storage-only columns (password hash,
//! job reference) that never leave the service.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use habit_types::models::{Habit, User};
use habit_types::{Progress, ReminderTime};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub password: String,
    pub telegram_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl UserRow {
    pub fn into_user(self) -> User {
        User {
            id: self.id,
            username: self.username,
            telegram_id: self.telegram_id,
            created_at: self.created_at,
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HabitRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub reminder_time: ReminderTime,
    pub completion_count: u32,
    pub streak: u32,
    pub last_completed: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub job_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HabitRow {
    pub fn progress(&self) -> Progress {
        Progress {
            completion_count: self.completion_count,
            streak: self.streak,
            last_completed: self.last_completed,
        }
    }

    pub fn into_habit(self) -> Habit {
        Habit {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            reminder_time: self.reminder_time,
            completion_count: self.completion_count,
            streak: self.streak,
            last_completed: self.last_completed,
            is_active: self.is_active,
            created_at: self.created_at,
        }
    }
}

/// Fields supplied when inserting a habit; counters start at zero.
#[derive(Debug, Clone)]
pub struct NewHabit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub reminder_time: ReminderTime,
    pub job_id: Option<String>,
}
