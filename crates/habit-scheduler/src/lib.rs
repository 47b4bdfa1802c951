//! Reminder scheduling: one job per active habit, keyed by a stable id.
//!
//! [`ReminderScheduler`] is the seam the API talks to. [`CronScheduler`]
//! runs jobs on the tokio runtime; [`InMemoryScheduler`] only records them.

pub mod cron;
pub mod job;
pub mod memory;
pub mod notifier;

pub use cron::CronScheduler;
pub use job::{ReminderJob, ReminderScheduler, SchedulerError, job_id, next_fire};
pub use memory::InMemoryScheduler;
pub use notifier::{LogNotifier, Notifier};
