use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::job::{ReminderJob, ReminderScheduler, SchedulerError};

/// Scheduler that books jobs without ever firing them.
///
/// Backs tests and dry runs; [`InMemoryScheduler::fail_next_registration`]
/// makes the next `register` call fail.
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    jobs: Mutex<BTreeMap<String, ReminderJob>>,
    fail_next: AtomicBool,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<ReminderJob> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, job_id: &str) -> Option<ReminderJob> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned()
    }

    pub fn fail_next_registration(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl ReminderScheduler for InMemoryScheduler {
    fn register(&self, job: ReminderJob) -> Result<(), SchedulerError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::Rejected(format!("injected failure for {}", job.id)));
        }
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&job.id) {
            return Err(SchedulerError::Duplicate(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn cancel(&self, job_id: &str) -> bool {
        let removed = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id)
            .is_some();
        if !removed {
            warn!(job_id, "Cancel requested for unknown reminder job");
        }
        removed
    }

    fn is_registered(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn books_and_cancels() {
        let scheduler = InMemoryScheduler::new();
        let job = ReminderJob::new(Uuid::new_v4(), 1, "Read", "09:00".parse().unwrap());

        scheduler.register(job.clone()).unwrap();
        assert_eq!(scheduler.get(&job.id), Some(job.clone()));
        assert!(matches!(scheduler.register(job.clone()), Err(SchedulerError::Duplicate(_))));

        assert!(scheduler.cancel(&job.id));
        assert!(!scheduler.cancel(&job.id));
        assert!(scheduler.jobs().is_empty());
    }

    #[test]
    fn injected_failure_applies_once() {
        let scheduler = InMemoryScheduler::new();
        let job = ReminderJob::new(Uuid::new_v4(), 1, "Read", "09:00".parse().unwrap());

        scheduler.fail_next_registration();
        assert!(matches!(scheduler.register(job.clone()), Err(SchedulerError::Rejected(_))));
        assert!(!scheduler.is_registered(&job.id));
        scheduler.register(job).unwrap();
    }
}
