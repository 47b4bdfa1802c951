use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{FixedOffset, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::job::{ReminderJob, ReminderScheduler, SchedulerError, next_fire};
use crate::notifier::Notifier;

/// Runs every registered reminder as its own tokio task that sleeps until
/// the next local `HH:MM` and then hands the text to the notifier.
pub struct CronScheduler<N> {
    notifier: Arc<N>,
    tz: FixedOffset,
    runtime: Handle,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl<N: Notifier> CronScheduler<N> {
    /// Must be called from within a tokio runtime; jobs are spawned on it.
    pub fn new(notifier: N, tz: FixedOffset) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        Ok(Self {
            notifier: Arc::new(notifier),
            tz,
            runtime,
            jobs: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Abort every job and refuse further registrations.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let count = jobs.len();
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
        info!("Reminder scheduler stopped ({} jobs cancelled)", count);
    }
}

impl<N: Notifier> ReminderScheduler for CronScheduler<N> {
    fn register(&self, job: ReminderJob) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::Stopped);
        }

        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&job.id) {
            return Err(SchedulerError::Duplicate(job.id));
        }

        debug!(job_id = %job.id, at = %job.at, "Registering reminder");
        let id = job.id.clone();
        let handle = self
            .runtime
            .spawn(run_job(job, self.notifier.clone(), self.tz));
        jobs.insert(id, handle);
        Ok(())
    }

    fn cancel(&self, job_id: &str) -> bool {
        let removed = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id);
        match removed {
            Some(handle) => {
                handle.abort();
                debug!(job_id, "Reminder cancelled");
                true
            }
            None => {
                warn!(job_id, "Cancel requested for unknown reminder job");
                false
            }
        }
    }

    fn is_registered(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(job_id)
    }
}

async fn run_job<N: Notifier>(job: ReminderJob, notifier: Arc<N>, tz: FixedOffset) {
    let mut after = Utc::now();
    loop {
        let target = next_fire(after, job.at, tz);
        let wait = (target - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        // Delivery runs detached so a slow send never delays the next firing.
        let notifier = notifier.clone();
        let (job_id, chat_id, text) = (job.id.clone(), job.chat_id, job.message());
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(chat_id, &text).await {
                warn!(job_id = %job_id, chat_id, "Reminder delivery failed: {:#}", e);
            }
        });

        // never fire the same slot twice, even if the wall clock lags the timer
        after = Utc::now().max(target);
    }
}
