use log::info;

use crate::BatchError;

use super::job::{BatchStatus, JobExecution};

/// Callbacks around a job run.
///
/// Errors are logged and ignored by the job, unless it was built with
/// `fail_on_listener_error(true)`.
pub trait JobExecutionListener {
    fn before_job(&self, _execution: &JobExecution) -> Result<(), BatchError> {
        Ok(())
    }

    fn after_job(&self, _execution: &JobExecution) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Reports a failed run as a listener error.
///
/// Combined with `fail_on_listener_error(true)`, a failed run is surfaced to
/// whoever launched the job instead of only being recorded.
#[derive(Debug, Default)]
pub struct FailOnFailureListener;

impl JobExecutionListener for FailOnFailureListener {
    fn after_job(&self, execution: &JobExecution) -> Result<(), BatchError> {
        info!("{}", execution);

        if execution.status == BatchStatus::Failed {
            return Err(BatchError::Listener(format!(
                "job {} execution {} failed: {}",
                execution.job_name, execution.id, execution.exit_status.exit_description
            )));
        }
        Ok(())
    }
}
