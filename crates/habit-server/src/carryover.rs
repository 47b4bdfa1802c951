use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use habit_api::AppState;
use habit_scheduler::next_fire;
use habit_types::ReminderTime;

/// Daily sweep that zeroes the streaks of habits missed before yesterday.
/// At most one sweep runs at a time.
pub struct CarryOver {
    state: AppState,
    running: Mutex<()>,
}

impl CarryOver {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            running: Mutex::new(()),
        }
    }

    /// Sweep as of `now`. Returns `None` when another sweep is still running.
    pub async fn run_once(&self, now: DateTime<Utc>) -> anyhow::Result<Option<usize>> {
        let Ok(_guard) = self.running.try_lock() else {
            return Ok(None);
        };

        let state = self.state.clone();
        let tz = state.tz;
        let reset = tokio::task::spawn_blocking(move || state.db.carry_over(now, tz)).await??;
        Ok(Some(reset))
    }

    /// Run the sweep every day at local time `at`.
    pub async fn run_daily(self: Arc<Self>, at: ReminderTime) {
        let mut after = Utc::now();
        loop {
            let target = next_fire(after, at, self.state.tz);
            debug!(next = %target, "Next streak carry-over");
            tokio::time::sleep((target - Utc::now()).to_std().unwrap_or_default()).await;

            match self.run_once(Utc::now()).await {
                Ok(Some(count)) => info!("Carry-over: reset {} streaks", count),
                Ok(None) => warn!("Carry-over skipped: previous run still in progress"),
                Err(e) => warn!("Carry-over error: {:#}", e),
            }

            after = Utc::now().max(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use habit_api::AppStateInner;
    use habit_db::Database;
    use habit_db::models::NewHabit;
    use habit_scheduler::InMemoryScheduler;
    use uuid::Uuid;

    fn state() -> AppState {
        Arc::new(AppStateInner::new(
            Database::open_in_memory().unwrap(),
            "test-secret".into(),
            FixedOffset::east_opt(0).unwrap(),
            Arc::new(InMemoryScheduler::new()),
        ))
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, d, 9, 0, 0).unwrap()
    }

    fn seed(state: &AppState) -> Uuid {
        let user = state
            .db
            .create_user(Uuid::new_v4(), "alice", "hash", None)
            .unwrap();
        let habit = state
            .db
            .insert_habit(&NewHabit {
                id: Uuid::new_v4(),
                user_id: user.id,
                name: "Read".into(),
                reminder_time: "09:00".parse().unwrap(),
                job_id: None,
            })
            .unwrap();
        habit.id
    }

    #[tokio::test]
    async fn sweep_resets_missed_streaks() {
        let state = state();
        let id = seed(&state);
        state.db.complete_habit(id, day(1), state.tz).unwrap();

        let carry = CarryOver::new(state.clone());
        assert_eq!(carry.run_once(day(2)).await.unwrap(), Some(0));
        assert_eq!(carry.run_once(day(3)).await.unwrap(), Some(1));
        assert_eq!(state.db.get_habit(id).unwrap().unwrap().streak, 0);
    }

    #[tokio::test]
    async fn overlapping_sweeps_are_skipped() {
        let carry = CarryOver::new(state());
        let _held = carry.running.lock().await;
        assert_eq!(carry.run_once(day(3)).await.unwrap(), None);
    }
}
