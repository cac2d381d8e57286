use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};

use crate::BatchError;

use super::{
    job::{BatchStatus, ExitStatus, Job, JobExecution, JobResult},
    parameters::JobParameters,
    repository::JobRepository,
};

/// Launches jobs against a job repository.
///
/// The launcher is shared between triggers (startup run, scheduler); the
/// repository decides atomically whether a run may start.
#[derive(Clone)]
pub struct JobLauncher {
    repository: Arc<dyn JobRepository>,
}

impl JobLauncher {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &dyn JobRepository {
        self.repository.as_ref()
    }

    /// Runs `job` for the instance identified by `job_parameters`.
    ///
    /// # Returns
    /// - `Ok(JobExecution)` once the run is over, whether it completed or failed;
    ///   the outcome is in `JobExecution::status`
    /// - `Err(BatchError::InvalidJobParameters)`,
    ///   `Err(BatchError::JobExecutionAlreadyRunning)` or
    ///   `Err(BatchError::JobInstanceAlreadyComplete)` when the run was refused
    ///   before any step started
    /// - `Err(BatchError::Listener)` when a listener failed and the job is
    ///   configured to fail on listener errors
    pub fn run(&self, job: &dyn Job, job_parameters: JobParameters) -> JobResult<JobExecution> {
        job.validate_parameters(&job_parameters)?;

        let mut execution = self
            .repository
            .create_job_execution(
                job.get_name(),
                &job_parameters,
                job.is_restartable_if_complete(),
            )
            .inspect_err(|err| warn!("Job: [{}] not launched: {}", job.get_name(), err))?;

        info!(
            "Job: [{}] launched with the following parameters: [{}]",
            job.get_name(),
            execution.job_parameters
        );

        if let Err(err) = job.execute(&mut execution, self.repository.as_ref()) {
            self.record_abnormal_end(&mut execution, &err);
            return Err(err);
        }

        info!(
            "Job: [{}] completed with the following parameters: [{}] and the following status: [{}]{}",
            job.get_name(),
            execution.job_parameters,
            execution.status,
            execution
                .duration()
                .map(|d| format!(" in {}ms", d.num_milliseconds()))
                .unwrap_or_default()
        );

        Ok(execution)
    }

    /// Runs the next instance of `job`, using its incrementer on the
    /// parameters of the last instance.
    pub fn start_next_instance(&self, job: &dyn Job) -> JobResult<JobExecution> {
        let incrementer = job.get_incrementer().ok_or_else(|| {
            BatchError::Configuration(format!("job {} has no incrementer", job.get_name()))
        })?;

        let previous = match self.repository.get_last_job_instance(job.get_name())? {
            Some(instance) => self
                .repository
                .find_job_executions(&instance)?
                .into_iter()
                .next()
                .map(|execution| execution.job_parameters),
            None => None,
        };

        self.run(job, incrementer.get_next(previous.as_ref()))
    }

    /// Makes sure an execution interrupted by an error does not stay running.
    ///
    /// The stored status decides: the in-memory one may already be terminal
    /// when it was the final write that failed.
    fn record_abnormal_end(&self, execution: &mut JobExecution, err: &BatchError) {
        let stored_status = match self.repository.get_job_execution(execution.id) {
            Ok(Some(stored)) => stored.status,
            Ok(None) => return,
            Err(lookup_error) => {
                warn!(
                    "Unable to read back job execution {}: {}",
                    execution.id, lookup_error
                );
                execution.status
            }
        };
        if !stored_status.is_running() {
            return;
        }

        execution.end_time = Some(Utc::now());
        execution.exit_status = ExitStatus::failed(&err.to_string());
        execution.status = BatchStatus::Failed;
        if let Err(update_error) = self.repository.update_job_execution(execution) {
            error!(
                "Unable to record the failure of job execution {}: {}",
                execution.id, update_error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::BatchError;
    use crate::core::{
        job::{BatchStatus, JobBuilder, JobExecution, JobInstance},
        listener::{FailOnFailureListener, JobExecutionListener},
        parameters::{
            DefaultJobParametersValidator, JobParameters, JobParametersBuilder, RUN_ID_KEY,
            RunIdIncrementer,
        },
        repository::{InMemoryJobRepository, JobRepository},
        step::{Step, StepExecution, StepStatus},
    };

    use super::JobLauncher;

    struct CountingStep {
        name: String,
        runs: Cell<usize>,
        fail: Cell<bool>,
        resumed_from: Cell<usize>,
    }

    impl CountingStep {
        fn new(name: &str, fail: bool) -> Self {
            Self {
                name: name.to_string(),
                runs: Cell::new(0),
                fail: Cell::new(fail),
                resumed_from: Cell::new(0),
            }
        }
    }

    impl Step for CountingStep {
        fn get_name(&self) -> &str {
            &self.name
        }

        fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
            self.runs.set(self.runs.get() + 1);
            self.resumed_from.set(step_execution.commit_position);
            step_execution.read_count = 3;
            if self.fail.get() {
                step_execution.commit_position += 2;
                step_execution.status = StepStatus::Failed;
                step_execution.exit_description = "ItemWriter from: disk full".to_string();
                Err(BatchError::Step(self.name.clone()))
            } else {
                step_execution.write_count = 3;
                step_execution.commit_position += 3;
                step_execution.status = StepStatus::Completed;
                Ok(())
            }
        }
    }

    struct BrokenListener;

    impl JobExecutionListener for BrokenListener {
        fn before_job(&self, _execution: &JobExecution) -> Result<(), BatchError> {
            Err(BatchError::Listener("before".to_string()))
        }
    }

    /// Fails the first update that would mark an execution completed.
    struct FlakyRepository {
        inner: InMemoryJobRepository,
        failed_once: AtomicBool,
    }

    impl JobRepository for FlakyRepository {
        fn create_job_execution(
            &self,
            job_name: &str,
            job_parameters: &JobParameters,
            restartable_if_complete: bool,
        ) -> Result<JobExecution, BatchError> {
            self.inner
                .create_job_execution(job_name, job_parameters, restartable_if_complete)
        }

        fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError> {
            if execution.status == BatchStatus::Completed
                && !self.failed_once.swap(true, Ordering::SeqCst)
            {
                return Err(BatchError::Repository("disk I/O error".to_string()));
            }
            self.inner.update_job_execution(execution)
        }

        fn get_job_execution(&self, id: u64) -> Result<Option<JobExecution>, BatchError> {
            self.inner.get_job_execution(id)
        }

        fn get_job_instance(
            &self,
            job_name: &str,
            job_parameters: &JobParameters,
        ) -> Result<Option<JobInstance>, BatchError> {
            self.inner.get_job_instance(job_name, job_parameters)
        }

        fn get_last_job_instance(&self, job_name: &str) -> Result<Option<JobInstance>, BatchError> {
            self.inner.get_last_job_instance(job_name)
        }

        fn find_job_executions(
            &self,
            instance: &JobInstance,
        ) -> Result<Vec<JobExecution>, BatchError> {
            self.inner.find_job_executions(instance)
        }
    }

    fn launcher() -> JobLauncher {
        JobLauncher::new(Arc::new(InMemoryJobRepository::new()))
    }

    fn date(value: &str) -> JobParameters {
        JobParametersBuilder::new()
            .add_string("date", value)
            .to_job_parameters()
    }

    #[test]
    fn completed_run_is_persisted_with_its_steps() {
        let launcher = launcher();
        let step = CountingStep::new("step1", false);
        let job = JobBuilder::new().name("importUserJob").start(&step).build();

        let execution = launcher.run(&job, date("d1")).unwrap();

        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.exit_status.exit_code, "COMPLETED");
        assert!(execution.start_time.is_some() && execution.end_time.is_some());

        let stored = launcher
            .repository()
            .get_job_execution(execution.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored, execution);
        assert_eq!(stored.get_step_execution("step1").unwrap().write_count, 3);
    }

    #[test]
    fn completed_instance_is_not_run_twice() {
        let launcher = launcher();
        let step = CountingStep::new("step1", false);
        let job = JobBuilder::new().name("importUserJob").start(&step).build();

        launcher.run(&job, date("d1")).unwrap();
        let second = launcher.run(&job, date("d1"));

        assert!(matches!(second, Err(BatchError::JobInstanceAlreadyComplete(_))));
        assert_eq!(step.runs.get(), 1);

        let restartable = JobBuilder::new()
            .name("importUserJob")
            .start(&step)
            .restartable_if_complete(true)
            .build();
        let third = launcher.run(&restartable, date("d1")).unwrap();
        assert_eq!(third.status, BatchStatus::Completed);
        assert_eq!(step.runs.get(), 2);
    }

    #[test]
    fn failed_step_stops_the_chain_and_the_instance_can_be_restarted() {
        let launcher = launcher();
        let failing = CountingStep::new("step1", true);
        let next = CountingStep::new("step2", false);
        let job = JobBuilder::new()
            .name("importUserJob2")
            .start(&failing)
            .next(&next)
            .build();

        let first = launcher.run(&job, date("d1")).unwrap();

        assert_eq!(first.status, BatchStatus::Failed);
        assert_eq!(first.exit_status.exit_code, "FAILED");
        assert!(first.exit_status.exit_description.contains("disk full"));
        assert_eq!(next.runs.get(), 0);
        assert_eq!(first.step_executions.len(), 1);

        let second = launcher.run(&job, date("d1")).unwrap();
        assert_eq!(second.job_instance_id, first.job_instance_id);
        assert_ne!(second.id, first.id);
    }

    #[test]
    fn restart_skips_completed_steps_and_resumes_the_failed_one() {
        let launcher = launcher();
        let first_step = CountingStep::new("step1", false);
        let second_step = CountingStep::new("step2", true);
        let job = JobBuilder::new()
            .name("importUserJob2")
            .start(&first_step)
            .next(&second_step)
            .build();

        let failed = launcher.run(&job, date("d1")).unwrap();
        assert_eq!(failed.status, BatchStatus::Failed);
        assert_eq!(failed.get_step_execution("step2").unwrap().commit_position, 2);

        second_step.fail.set(false);
        let restarted = launcher.run(&job, date("d1")).unwrap();

        assert_eq!(restarted.status, BatchStatus::Completed);
        assert_eq!(first_step.runs.get(), 1);
        assert_eq!(second_step.runs.get(), 2);
        assert_eq!(second_step.resumed_from.get(), 2);
        assert!(restarted.get_step_execution("step1").is_none());
        assert_eq!(restarted.get_step_execution("step2").unwrap().commit_position, 5);

        let rerun = JobBuilder::new()
            .name("importUserJob2")
            .start(&first_step)
            .next(&second_step)
            .restartable_if_complete(true)
            .build();
        launcher.run(&rerun, date("d1")).unwrap();
        assert_eq!(first_step.runs.get(), 2);
        assert_eq!(second_step.resumed_from.get(), 0);
    }

    #[test]
    fn failed_final_write_does_not_leave_the_instance_running() {
        let launcher = JobLauncher::new(Arc::new(FlakyRepository {
            inner: InMemoryJobRepository::new(),
            failed_once: AtomicBool::new(false),
        }));
        let step = CountingStep::new("step1", false);
        let job = JobBuilder::new().name("importUserJob").start(&step).build();

        let first = launcher.run(&job, date("d1"));
        assert!(matches!(first, Err(BatchError::Repository(_))));

        let stored = launcher
            .repository()
            .get_last_job_execution("importUserJob", &date("d1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert!(stored.exit_status.exit_description.contains("disk I/O error"));

        let retry = launcher.run(&job, date("d1")).unwrap();
        assert_eq!(retry.status, BatchStatus::Completed);
        assert_eq!(retry.job_instance_id, stored.job_instance_id);
        assert_eq!(step.runs.get(), 1);
    }

    #[test]
    fn invalid_parameters_are_rejected_before_any_step() {
        let launcher = launcher();
        let step = CountingStep::new("step1", false);
        let validator = DefaultJobParametersValidator::new(&["date"], &[]);
        let job = JobBuilder::new()
            .name("importUserJob")
            .start(&step)
            .validator(&validator)
            .build();

        let result = launcher.run(&job, JobParameters::new());

        assert!(matches!(result, Err(BatchError::InvalidJobParameters(_))));
        assert_eq!(step.runs.get(), 0);
        assert!(
            launcher
                .repository()
                .get_last_job_instance("importUserJob")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn listener_errors_are_ignored_by_default() {
        let launcher = launcher();
        let step = CountingStep::new("step1", false);
        let listener = BrokenListener;
        let job = JobBuilder::new()
            .name("importUserJob")
            .start(&step)
            .listener(&listener)
            .build();

        let execution = launcher.run(&job, date("d1")).unwrap();

        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(step.runs.get(), 1);
    }

    #[test]
    fn strict_before_listener_error_fails_the_job_without_running_steps() {
        let launcher = launcher();
        let step = CountingStep::new("step1", false);
        let listener = BrokenListener;
        let job = JobBuilder::new()
            .name("importUserJob")
            .start(&step)
            .listener(&listener)
            .fail_on_listener_error(true)
            .build();

        let execution = launcher.run(&job, date("d1")).unwrap();

        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(step.runs.get(), 0);
    }

    #[test]
    fn strict_after_listener_error_is_returned_once_the_run_is_persisted() {
        let launcher = launcher();
        let step = CountingStep::new("step2", true);
        let listener = FailOnFailureListener;
        let job = JobBuilder::new()
            .name("importUserJob2")
            .start(&step)
            .listener(&listener)
            .fail_on_listener_error(true)
            .build();

        let result = launcher.run(&job, date("d1"));

        assert!(matches!(result, Err(BatchError::Listener(_))));
        let stored = launcher
            .repository()
            .get_last_job_execution("importUserJob2", &date("d1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
    }

    #[test]
    fn next_instance_increments_the_run_id() {
        let launcher = launcher();
        let step = CountingStep::new("step1", false);
        let incrementer = RunIdIncrementer;
        let job = JobBuilder::new()
            .name("importUserJob")
            .start(&step)
            .incrementer(&incrementer)
            .build();

        let first = launcher.start_next_instance(&job).unwrap();
        let second = launcher.start_next_instance(&job).unwrap();

        assert_eq!(first.job_parameters.get_long(RUN_ID_KEY), Some(1));
        assert_eq!(second.job_parameters.get_long(RUN_ID_KEY), Some(2));
        assert_ne!(first.job_instance_id, second.job_instance_id);
    }

    #[test]
    fn next_instance_requires_an_incrementer() {
        let launcher = launcher();
        let step = CountingStep::new("step1", false);
        let job = JobBuilder::new().name("importUserJob").start(&step).build();

        assert!(matches!(
            launcher.start_next_instance(&job),
            Err(BatchError::Configuration(_))
        ));
    }
}
