use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::BatchError;

use super::{
    build_name,
    listener::JobExecutionListener,
    parameters::{JobParameters, JobParametersIncrementer, JobParametersValidator},
    repository::JobRepository,
    step::{Step, StepExecution, StepStatus},
};

/// Type alias for job execution results.
pub type JobResult<T> = Result<T, BatchError>;

/// Status of a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// The execution has been created but no step has run yet.
    Starting,
    /// The execution is running.
    Started,
    /// The execution has successfully completed.
    Completed,
    /// The execution has failed.
    Failed,
    /// The execution has been stopped by request.
    Stopped,
    /// The status is uncertain, for instance before any run.
    Unknown,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, BatchStatus::Starting | BatchStatus::Started)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped
        )
    }

    /// Whether an execution in this status may move to `next`.
    ///
    /// Statuses only move forward: a terminal status is final.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        match self {
            BatchStatus::Starting => next != BatchStatus::Starting && next != BatchStatus::Unknown,
            BatchStatus::Started | BatchStatus::Unknown => next.is_terminal(),
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped => false,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STARTING" => Ok(BatchStatus::Starting),
            "STARTED" => Ok(BatchStatus::Started),
            "COMPLETED" => Ok(BatchStatus::Completed),
            "FAILED" => Ok(BatchStatus::Failed),
            "STOPPED" => Ok(BatchStatus::Stopped),
            "UNKNOWN" => Ok(BatchStatus::Unknown),
            other => Err(BatchError::Configuration(format!(
                "unknown batch status: {}",
                other
            ))),
        }
    }
}

/// Exit code and description of a finished execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    pub fn new(exit_code: &str, exit_description: &str) -> Self {
        Self {
            exit_code: exit_code.to_string(),
            exit_description: exit_description.to_string(),
        }
    }

    pub fn executing() -> Self {
        Self::new("EXECUTING", "")
    }

    pub fn completed() -> Self {
        Self::new("COMPLETED", "")
    }

    pub fn failed(description: &str) -> Self {
        Self::new("FAILED", description)
    }
}

/// A job identified by its name and the key of its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: u64,
    pub job_name: String,
    pub job_key: String,
}

/// One attempt to run a job instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: u64,
    pub job_instance_id: u64,
    pub job_name: String,
    pub job_parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    pub fn new(id: u64, instance: &JobInstance, job_parameters: JobParameters) -> Self {
        Self {
            id,
            job_instance_id: instance.id,
            job_name: instance.job_name.clone(),
            job_parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            step_executions: Vec::new(),
        }
    }

    /// Moves the execution to `next`, refusing backward transitions.
    pub fn update_status(&mut self, next: BatchStatus) -> Result<(), BatchError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(BatchError::StatusTransition(format!(
                "job execution {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn get_step_execution(&self, name: &str) -> Option<&StepExecution> {
        self.step_executions.iter().find(|step| step.name == name)
    }
}

impl fmt::Display for JobExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JobExecution: id={}, job={}, instance={}, status={}, exit={}, parameters={}",
            self.id,
            self.job_name,
            self.job_instance_id,
            self.status,
            self.exit_status.exit_code,
            self.job_parameters
        )
    }
}

/// A batch job: an ordered chain of steps.
pub trait Job {
    fn get_name(&self) -> &str;

    /// Whether a completed instance may be run again.
    fn is_restartable_if_complete(&self) -> bool {
        false
    }

    fn validate_parameters(&self, _parameters: &JobParameters) -> Result<(), BatchError> {
        Ok(())
    }

    fn get_incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        None
    }

    /// Runs the steps for an execution created by the repository.
    ///
    /// The final status is recorded into `execution` and persisted. An `Err` is
    /// only returned when a listener fails and the job is configured to fail on
    /// listener errors, or when the repository cannot persist the execution.
    fn execute(&self, execution: &mut JobExecution, repository: &dyn JobRepository)
    -> JobResult<()>;
}

/// Job running its steps one after the other.
pub struct SimpleJob<'a> {
    name: String,
    steps: Vec<&'a dyn Step>,
    listeners: Vec<&'a dyn JobExecutionListener>,
    validator: Option<&'a dyn JobParametersValidator>,
    incrementer: Option<&'a dyn JobParametersIncrementer>,
    restartable_if_complete: bool,
    fail_on_listener_error: bool,
}

impl Job for SimpleJob<'_> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn is_restartable_if_complete(&self) -> bool {
        self.restartable_if_complete
    }

    fn validate_parameters(&self, parameters: &JobParameters) -> Result<(), BatchError> {
        match self.validator {
            Some(validator) => validator.validate(parameters),
            None => Ok(()),
        }
    }

    fn get_incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        self.incrementer
    }

    fn execute(
        &self,
        execution: &mut JobExecution,
        repository: &dyn JobRepository,
    ) -> JobResult<()> {
        execution.start_time = Some(Utc::now());
        execution.update_status(BatchStatus::Started)?;
        repository.update_job_execution(execution)?;

        info!("Start of job: {}, execution: {}", self.name, execution.id);

        let mut failure: Option<String> = None;

        for listener in &self.listeners {
            if let Err(err) = listener.before_job(execution) {
                if self.fail_on_listener_error {
                    failure = Some(err.to_string());
                    break;
                }
                warn!("Ignoring listener error before job {}: {}", self.name, err);
            }
        }

        if failure.is_none() {
            failure = self.execute_steps(execution, repository)?;
        }

        execution.end_time = Some(Utc::now());
        match &failure {
            None => {
                execution.update_status(BatchStatus::Completed)?;
                execution.exit_status = ExitStatus::completed();
                info!("End of job: {}, execution: {}", self.name, execution.id);
            }
            Some(description) => {
                execution.update_status(BatchStatus::Failed)?;
                execution.exit_status = ExitStatus::failed(description);
                error!(
                    "Job {} failed, execution: {}: {}",
                    self.name, execution.id, description
                );
            }
        }
        repository.update_job_execution(execution)?;

        let mut listener_error = None;
        for listener in &self.listeners {
            if let Err(err) = listener.after_job(execution) {
                if self.fail_on_listener_error {
                    error!("Listener failed after job {}: {}", self.name, err);
                    listener_error.get_or_insert(err);
                } else {
                    warn!("Ignoring listener error after job {}: {}", self.name, err);
                }
            }
        }

        match listener_error {
            Some(BatchError::Listener(message)) => Err(BatchError::Listener(message)),
            Some(other) => Err(BatchError::Listener(other.to_string())),
            None => Ok(()),
        }
    }
}

impl SimpleJob<'_> {
    /// Runs every step in order and returns the description of the first failure.
    fn execute_steps(
        &self,
        execution: &mut JobExecution,
        repository: &dyn JobRepository,
    ) -> JobResult<Option<String>> {
        let unfinished = self.unfinished_executions(execution, repository)?;

        for step in &self.steps {
            let previous = unfinished
                .iter()
                .find_map(|previous| previous.get_step_execution(step.get_name()));

            let mut step_execution = match previous {
                Some(previous) if previous.status == StepStatus::Completed => {
                    info!(
                        "Step {} already completed for instance {}, not run again",
                        previous.name, execution.job_instance_id
                    );
                    continue;
                }
                Some(previous) => StepExecution::restart_of(previous),
                None => StepExecution::new(step.get_name()),
            };
            let result = step.execute(&mut step_execution);
            let description = step_execution.exit_description.clone();

            execution.step_executions.push(step_execution);
            repository.update_job_execution(execution)?;

            if let Err(err) = result {
                return Ok(Some(format!("{}: {}", err, description)));
            }
        }
        Ok(None)
    }

    /// Earlier executions of the same instance since it last completed, most
    /// recent first. A restart picks its steps up from these.
    fn unfinished_executions(
        &self,
        execution: &JobExecution,
        repository: &dyn JobRepository,
    ) -> JobResult<Vec<JobExecution>> {
        let instance = JobInstance {
            id: execution.job_instance_id,
            job_name: execution.job_name.clone(),
            job_key: execution.job_parameters.job_key(),
        };

        Ok(repository
            .find_job_executions(&instance)?
            .into_iter()
            .filter(|previous| previous.id != execution.id)
            .take_while(|previous| previous.status != BatchStatus::Completed)
            .collect())
    }
}

/// Builder for creating a job.
///
/// # Example
///
/// ```rust,no_run,compile_fail
/// let job = JobBuilder::new()
///     .name("importUserJob")
///     .start(&step1)
///     .next(&step2)
///     .listener(&health)
///     .build();
/// ```
#[derive(Default)]
pub struct JobBuilder<'a> {
    name: Option<String>,
    steps: Vec<&'a dyn Step>,
    listeners: Vec<&'a dyn JobExecutionListener>,
    validator: Option<&'a dyn JobParametersValidator>,
    incrementer: Option<&'a dyn JobParametersIncrementer>,
    restartable_if_complete: bool,
    fail_on_listener_error: bool,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the first step of the job.
    pub fn start(mut self, step: &'a dyn Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Adds a step, run after the previously added ones.
    pub fn next(mut self, step: &'a dyn Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn listener(mut self, listener: &'a dyn JobExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn validator(mut self, validator: &'a dyn JobParametersValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn incrementer(mut self, incrementer: &'a dyn JobParametersIncrementer) -> Self {
        self.incrementer = Some(incrementer);
        self
    }

    /// Allows a new execution of an instance that already completed.
    pub fn restartable_if_complete(mut self, yes: bool) -> Self {
        self.restartable_if_complete = yes;
        self
    }

    /// Makes listener errors fail the run instead of being logged.
    pub fn fail_on_listener_error(mut self, yes: bool) -> Self {
        self.fail_on_listener_error = yes;
        self
    }

    /// Builds the job. A random name is generated when none was given.
    pub fn build(self) -> SimpleJob<'a> {
        SimpleJob {
            name: self.name.unwrap_or_else(build_name),
            steps: self.steps,
            listeners: self.listeners,
            validator: self.validator,
            incrementer: self.incrementer,
            restartable_if_complete: self.restartable_if_complete,
            fail_on_listener_error: self.fail_on_listener_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_leaves_a_terminal_state() {
        for terminal in [
            BatchStatus::Completed,
            BatchStatus::Failed,
            BatchStatus::Stopped,
        ] {
            for next in [
                BatchStatus::Starting,
                BatchStatus::Started,
                BatchStatus::Completed,
                BatchStatus::Failed,
                BatchStatus::Stopped,
                BatchStatus::Unknown,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(BatchStatus::Starting.can_transition_to(BatchStatus::Started));
        assert!(BatchStatus::Started.can_transition_to(BatchStatus::Failed));
        assert!(!BatchStatus::Started.can_transition_to(BatchStatus::Starting));
    }

    #[test]
    fn failed_execution_cannot_be_marked_completed() {
        let instance = JobInstance {
            id: 1,
            job_name: "importUserJob".to_string(),
            job_key: String::new(),
        };
        let mut execution = JobExecution::new(1, &instance, JobParameters::new());

        execution.update_status(BatchStatus::Started).unwrap();
        execution.update_status(BatchStatus::Failed).unwrap();

        assert!(matches!(
            execution.update_status(BatchStatus::Completed),
            Err(BatchError::StatusTransition(_))
        ));
        assert_eq!(execution.status, BatchStatus::Failed);
    }

    #[test]
    fn batch_status_parses_case_insensitively() {
        assert_eq!("completed".parse::<BatchStatus>(), Ok(BatchStatus::Completed));
        assert_eq!(" FAILED ".parse::<BatchStatus>(), Ok(BatchStatus::Failed));
        assert!("DONE".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn builder_generates_a_name_when_missing() {
        let job = JobBuilder::new().build();
        assert_eq!(job.get_name().len(), 8);
        assert!(!job.is_restartable_if_complete());
    }
}
