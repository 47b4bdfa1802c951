use crate::Database;
use crate::models::{HabitRow, NewHabit, UserRow};
use anyhow::{Result, anyhow};
use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::debug;
use uuid::Uuid;

use habit_types::ReminderTime;
use habit_types::streak::HABIT_FORMED_THRESHOLD;

const USER_COLUMNS: &str = "id, username, password, telegram_id, created_at, is_active";
const HABIT_COLUMNS: &str = "id, user_id, name, reminder_time, completion_count, streak, \
                             last_completed, is_active, job_id, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        password_hash: &str,
        telegram_id: Option<i64>,
    ) -> Result<UserRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, telegram_id) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), username, password_hash, telegram_id],
            )?;
            query_user(conn, "id", &id.to_string())?
                .ok_or_else(|| anyhow!("User missing after insert: {}", id))
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", &username))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    pub fn get_user_by_telegram_id(&self, telegram_id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "telegram_id", &telegram_id))
    }

    /// Attach a messaging identity to an account. Fails with a UNIQUE
    /// violation when another account already holds it.
    pub fn link_telegram(&self, user_id: Uuid, telegram_id: i64) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET telegram_id = ?1 WHERE id = ?2",
                params![telegram_id, user_id.to_string()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_user(conn, "id", &user_id.to_string())
        })
    }

    // -- Habits --

    pub fn insert_habit(&self, habit: &NewHabit) -> Result<HabitRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO habits (id, user_id, name, reminder_time, job_id) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    habit.id.to_string(),
                    habit.user_id.to_string(),
                    habit.name,
                    habit.reminder_time.to_string(),
                    habit.job_id,
                ],
            )?;
            query_habit(conn, habit.id)?.ok_or_else(|| anyhow!("Habit missing after insert: {}", habit.id))
        })
    }

    pub fn get_habit(&self, id: Uuid) -> Result<Option<HabitRow>> {
        self.with_conn(|conn| query_habit(conn, id))
    }

    pub fn find_active_habit(&self, user_id: Uuid, name: &str) -> Result<Option<HabitRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {HABIT_COLUMNS} FROM habits WHERE user_id = ?1 AND name = ?2 AND is_active = 1"
            );
            Ok(conn
                .query_row(&sql, params![user_id.to_string(), name], map_habit)
                .optional()?)
        })
    }

    pub fn list_active_habits(&self, user_id: Uuid, skip: u32, limit: u32) -> Result<Vec<HabitRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {HABIT_COLUMNS} FROM habits
                 WHERE user_id = ?1 AND is_active = 1
                 ORDER BY created_at, rowid
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_id.to_string(), limit, skip], map_habit)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Active habits whose owner has a messaging identity, paired with that
    /// identity. Used to re-book reminders after a restart.
    pub fn reminder_targets(&self) -> Result<Vec<(HabitRow, i64)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}, u.telegram_id FROM habits h
                 JOIN users u ON u.id = h.user_id
                 WHERE h.is_active = 1 AND u.is_active = 1 AND u.telegram_id IS NOT NULL
                 ORDER BY h.created_at, h.rowid",
                prefixed_habit_columns("h")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| Ok((map_habit(row)?, row.get::<_, i64>(10)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Persist the user-editable fields and job reference of `habit`.
    /// Counters are owned by [`Database::complete_habit`] and the carry-over.
    pub fn save_habit_settings(&self, habit: &HabitRow) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE habits SET name = ?1, reminder_time = ?2, is_active = ?3, job_id = ?4 WHERE id = ?5",
                params![
                    habit.name,
                    habit.reminder_time.to_string(),
                    habit.is_active,
                    habit.job_id,
                    habit.id.to_string(),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn set_job_id(&self, id: Uuid, job_id: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE habits SET job_id = ?1 WHERE id = ?2",
                params![job_id, id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn delete_habit(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM habits WHERE id = ?1", [id.to_string()])?;
            Ok(changed > 0)
        })
    }

    /// Record a completion at `now`. Read, streak transition and write happen
    /// in one immediate transaction so concurrent completions of the same
    /// habit serialize. Returns `None` for missing or inactive habits.
    pub fn complete_habit(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        tz: FixedOffset,
    ) -> Result<Option<HabitRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(mut habit) = query_habit(&tx, id)? else {
                return Ok(None);
            };
            if !habit.is_active {
                return Ok(None);
            }

            let next = habit.progress().complete(now, tz);
            tx.execute(
                "UPDATE habits SET completion_count = ?1, streak = ?2, last_completed = ?3 WHERE id = ?4",
                params![next.completion_count, next.streak, next.last_completed, id.to_string()],
            )?;
            tx.commit()?;

            habit.completion_count = next.completion_count;
            habit.streak = next.streak;
            habit.last_completed = next.last_completed;
            Ok(Some(habit))
        })
    }

    /// Zero the streak of every active, not-yet-formed habit last completed
    /// before yesterday. Returns how many habits were reset.
    pub fn carry_over(&self, now: DateTime<Utc>, tz: FixedOffset) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let stale: Vec<HabitRow> = {
                let sql = format!(
                    "SELECT {HABIT_COLUMNS} FROM habits
                     WHERE is_active = 1 AND last_completed IS NOT NULL AND completion_count < ?1"
                );
                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt
                    .query_map([HABIT_FORMED_THRESHOLD], map_habit)?
                    .filter(|row| match row {
                        Ok(h) => h.progress().needs_carry_over(now, tz),
                        Err(_) => true,
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            };

            for habit in &stale {
                debug!(habit_id = %habit.id, streak = habit.streak, "Resetting streak");
                tx.execute("UPDATE habits SET streak = 0 WHERE id = ?1", [habit.id.to_string()])?;
            }
            tx.commit()?;

            Ok(stale.len())
        })
    }
}

fn prefixed_habit_columns(alias: &str) -> String {
    HABIT_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn query_user(conn: &Connection, column: &str, value: &dyn ToSql) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    Ok(conn.query_row(&sql, [value], map_user).optional()?)
}

fn query_habit(conn: &Connection, id: Uuid) -> Result<Option<HabitRow>> {
    let sql = format!("SELECT {HABIT_COLUMNS} FROM habits WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], map_habit).optional()?)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        telegram_id: row.get(3)?,
        created_at: row.get(4)?,
        is_active: row.get(5)?,
    })
}

fn map_habit(row: &Row<'_>) -> rusqlite::Result<HabitRow> {
    let reminder: String = row.get(3)?;
    let reminder_time = reminder
        .parse::<ReminderTime>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(HabitRow {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        name: row.get(2)?,
        reminder_time,
        completion_count: row.get(4)?,
        streak: row.get(5)?,
        last_completed: row.get(6)?,
        is_active: row.get(7)?,
        job_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
