//! Recurring job triggers.
//!
//! A [`JobScheduler`] owns a tokio task that sleeps until the next firing of
//! its [`Trigger`], then runs the job closure on the blocking pool. A run that
//! is rejected or panics is logged and the schedule goes on.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use cron::Schedule;
use log::{debug, error, info};
use tokio::{sync::watch, task::JoinHandle};

use crate::BatchError;

use super::job::{JobExecution, JobResult};

/// When a scheduled job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Cron expression with a seconds field, e.g. `0 0 0 * * *` for every midnight.
    Cron(Box<Schedule>),
    /// Fixed delay between the starts of two firings.
    FixedRate(Duration),
}

impl Trigger {
    pub fn cron(expression: &str) -> Result<Self, BatchError> {
        Schedule::from_str(expression)
            .map(|schedule| Trigger::Cron(Box::new(schedule)))
            .map_err(|e| {
                BatchError::Configuration(format!(
                    "invalid cron expression '{}': {}",
                    expression, e
                ))
            })
    }

    pub fn fixed_rate(period: Duration) -> Result<Self, BatchError> {
        if period.is_zero() {
            return Err(BatchError::Configuration(
                "the period of a fixed rate trigger must not be zero".to_string(),
            ));
        }
        Ok(Trigger::FixedRate(period))
    }

    /// First firing strictly after `after`, or `None` when the trigger is exhausted.
    pub fn next_after<Z: TimeZone>(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
        match self {
            Trigger::Cron(schedule) => schedule.after(after).next(),
            Trigger::FixedRate(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                after.clone().checked_add_signed(period)
            }
        }
    }
}

/// Runs a job on a [`Trigger`].
pub struct JobScheduler {
    name: String,
    trigger: Trigger,
}

/// Handle on a running scheduler. Dropping it stops the schedule as well.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the schedule. A run in progress is awaited.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }
}

impl JobScheduler {
    pub fn new(name: &str, trigger: Trigger) -> Self {
        Self {
            name: name.to_string(),
            trigger,
        }
    }

    /// Starts the schedule on the current tokio runtime.
    ///
    /// `task` is called on every firing, from the blocking pool. It is expected
    /// to build its own job and parameters and to launch it.
    pub fn start<F>(self, task: F) -> SchedulerHandle
    where
        F: Fn() -> JobResult<JobExecution> + Send + Sync + 'static,
    {
        let (shutdown, mut stopped) = watch::channel(false);
        let task = Arc::new(task);

        let handle = tokio::spawn(async move {
            info!("Scheduler for {} started", self.name);

            loop {
                let now = Local::now();
                let Some(next) = self.trigger.next_after(&now) else {
                    info!("No further firing for {}", self.name);
                    break;
                };
                let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                debug!("Next run of {} at {}", self.name, next);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stopped.changed() => break,
                }

                let task = Arc::clone(&task);
                match tokio::task::spawn_blocking(move || task()).await {
                    Ok(Ok(execution)) => {
                        info!("Scheduled run of {} ended: {}", self.name, execution)
                    }
                    Ok(Err(e)) => error!("Scheduled run of {} rejected: {}", self.name, e),
                    Err(e) => error!("Scheduled run of {} panicked: {}", self.name, e),
                }
            }

            info!("Scheduler for {} stopped", self.name);
        });

        SchedulerHandle {
            shutdown,
            task: handle,
        }
    }
}
