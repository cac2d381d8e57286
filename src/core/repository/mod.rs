//! Persistence of job instances and executions.
//!
//! The repository is the only concurrency guard of the launcher: creating an
//! execution is an atomic check-and-set, so two triggers racing on the same
//! job instance cannot both start it.

use crate::BatchError;

use super::{
    job::{BatchStatus, JobExecution, JobInstance},
    parameters::JobParameters,
};

/// In-memory repository.
pub mod memory;

#[cfg(feature = "rdbc-sqlite")]
/// Repository backed by SQLite tables.
pub mod sqlite;

pub use memory::InMemoryJobRepository;

#[cfg(feature = "rdbc-sqlite")]
pub use sqlite::SqliteJobRepository;

pub trait JobRepository: Send + Sync {
    /// Creates a new execution in `STARTING` status for `(job_name, job_parameters)`.
    ///
    /// The job instance is created on first use. Looking up the instance, checking
    /// its previous executions and inserting the new one happen atomically.
    ///
    /// # Errors
    /// - `BatchError::JobExecutionAlreadyRunning` if an execution of the instance
    ///   is `STARTING` or `STARTED`
    /// - `BatchError::JobInstanceAlreadyComplete` if an execution of the instance
    ///   completed and `restartable_if_complete` is false
    fn create_job_execution(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
        restartable_if_complete: bool,
    ) -> Result<JobExecution, BatchError>;

    /// Persists the state of an execution, including its step executions.
    ///
    /// # Errors
    /// `BatchError::StatusTransition` when the stored status may not move to the
    /// new one (a failed execution stays failed).
    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError>;

    fn get_job_execution(&self, id: u64) -> Result<Option<JobExecution>, BatchError>;

    fn get_job_instance(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError>;

    /// Most recently created instance of a job.
    fn get_last_job_instance(&self, job_name: &str) -> Result<Option<JobInstance>, BatchError>;

    /// Executions of an instance, most recent first.
    fn find_job_executions(&self, instance: &JobInstance) -> Result<Vec<JobExecution>, BatchError>;

    fn get_last_job_execution(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> Result<Option<JobExecution>, BatchError> {
        match self.get_job_instance(job_name, job_parameters)? {
            Some(instance) => Ok(self.find_job_executions(&instance)?.into_iter().next()),
            None => Ok(None),
        }
    }
}

/// Decides whether a new execution of an instance may start, given the
/// statuses of its previous executions.
pub(crate) fn check_can_start<'s>(
    job_name: &str,
    job_key: &str,
    statuses: impl IntoIterator<Item = &'s BatchStatus>,
    restartable_if_complete: bool,
) -> Result<(), BatchError> {
    let mut completed = false;

    for status in statuses {
        if status.is_running() {
            return Err(BatchError::JobExecutionAlreadyRunning(format!(
                "job {} with parameters {{{}}}",
                job_name, job_key
            )));
        }
        completed |= *status == BatchStatus::Completed;
    }

    if completed && !restartable_if_complete {
        return Err(BatchError::JobInstanceAlreadyComplete(format!(
            "job {} with parameters {{{}}}",
            job_name, job_key
        )));
    }

    Ok(())
}

const STATUSES: [BatchStatus; 6] = [
    BatchStatus::Starting,
    BatchStatus::Started,
    BatchStatus::Completed,
    BatchStatus::Failed,
    BatchStatus::Stopped,
    BatchStatus::Unknown,
];

/// Stored statuses from which an execution may be updated to `next`.
pub(crate) fn predecessors(next: BatchStatus) -> Vec<BatchStatus> {
    STATUSES
        .into_iter()
        .filter(|stored| *stored == next || stored.can_transition_to(next))
        .collect()
}

/// Rejects an update moving a stored execution backwards.
pub(crate) fn check_transition(
    execution_id: u64,
    stored: BatchStatus,
    next: BatchStatus,
) -> Result<(), BatchError> {
    if stored == next || stored.can_transition_to(next) {
        Ok(())
    } else {
        Err(BatchError::StatusTransition(format!(
            "stored job execution {} cannot move from {} to {}",
            execution_id, stored, next
        )))
    }
}

#[cfg(test)]
mod tests {
    use crate::BatchError;
    use crate::core::job::BatchStatus;

    use super::{check_can_start, check_transition, predecessors};

    #[test]
    fn running_execution_blocks_a_new_one() {
        let result = check_can_start(
            "importUserJob",
            "date=STRING:today",
            &[BatchStatus::Failed, BatchStatus::Started],
            true,
        );
        assert!(matches!(result, Err(BatchError::JobExecutionAlreadyRunning(_))));
    }

    #[test]
    fn completed_instance_needs_restart_permission() {
        let statuses = [BatchStatus::Failed, BatchStatus::Completed];

        assert!(matches!(
            check_can_start("importUserJob", "", &statuses, false),
            Err(BatchError::JobInstanceAlreadyComplete(_))
        ));
        assert!(check_can_start("importUserJob", "", &statuses, true).is_ok());
    }

    #[test]
    fn failed_instance_can_be_restarted() {
        assert!(check_can_start("importUserJob", "", &[BatchStatus::Failed], false).is_ok());
        assert!(check_can_start("importUserJob", "", &[], false).is_ok());
    }

    #[test]
    fn stored_failure_is_final() {
        assert!(check_transition(1, BatchStatus::Started, BatchStatus::Started).is_ok());
        assert!(check_transition(1, BatchStatus::Started, BatchStatus::Completed).is_ok());
        assert!(check_transition(1, BatchStatus::Failed, BatchStatus::Completed).is_err());
    }

    #[test]
    fn only_running_executions_can_complete() {
        assert_eq!(
            predecessors(BatchStatus::Completed),
            vec![
                BatchStatus::Starting,
                BatchStatus::Started,
                BatchStatus::Completed,
                BatchStatus::Unknown
            ]
        );
        assert_eq!(
            predecessors(BatchStatus::Started),
            vec![BatchStatus::Starting, BatchStatus::Started]
        );
    }
}
