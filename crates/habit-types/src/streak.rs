//! Completion and streak transitions.
//!
//! Calendar dates are taken in a single service-wide UTC offset; timestamps
//! themselves are always UTC.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Completion count at which a habit counts as formed. From then on the
/// daily carry-over no longer zeroes its streak.
pub const HABIT_FORMED_THRESHOLD: u32 = 21;

/// The mutable completion state of a habit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completion_count: u32,
    pub streak: u32,
    pub last_completed: Option<DateTime<Utc>>,
}

impl Progress {
    /// State after one more completion at `now`.
    ///
    /// A completion on the day after the previous one extends the streak, a
    /// second completion on the same day leaves it alone, anything else
    /// starts a new streak of one.
    pub fn complete(&self, now: DateTime<Utc>, tz: FixedOffset) -> Progress {
        let today = local_date(now, tz);
        let last = self.last_completed.map(|t| local_date(t, tz));

        let streak = match last {
            Some(d) if Some(d) == today.pred_opt() => self.streak + 1,
            Some(d) if d == today => self.streak,
            _ => 1,
        };

        Progress {
            completion_count: self.completion_count + 1,
            streak,
            last_completed: Some(now),
        }
    }

    /// True when the last completion falls before yesterday. Never-completed
    /// habits are not stale.
    pub fn is_stale(&self, now: DateTime<Utc>, tz: FixedOffset) -> bool {
        let Some(last) = self.last_completed else {
            return false;
        };
        match local_date(now, tz).pred_opt() {
            Some(yesterday) => local_date(last, tz) < yesterday,
            None => false,
        }
    }

    pub fn is_formed(&self) -> bool {
        self.completion_count >= HABIT_FORMED_THRESHOLD
    }

    /// Whether the daily sweep at `now` should zero this streak.
    pub fn needs_carry_over(&self, now: DateTime<Utc>, tz: FixedOffset) -> bool {
        !self.is_formed() && self.is_stale(now, tz)
    }

    pub fn carry_over(&self, now: DateTime<Utc>, tz: FixedOffset) -> Progress {
        if self.needs_carry_over(now, tz) {
            Progress { streak: 0, ..*self }
        } else {
            *self
        }
    }
}

pub fn local_date(t: DateTime<Utc>, tz: FixedOffset) -> NaiveDate {
    t.with_timezone(&tz).date_naive()
}
