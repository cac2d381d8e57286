use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use log::debug;

use crate::BatchError;
use crate::core::{
    job::{JobExecution, JobInstance},
    parameters::JobParameters,
};

use super::{JobRepository, check_can_start, check_transition};

#[derive(Default)]
struct State {
    last_instance_id: u64,
    last_execution_id: u64,
    instances: Vec<JobInstance>,
    executions: BTreeMap<u64, JobExecution>,
}

impl State {
    fn find_instance(&self, job_name: &str, job_key: &str) -> Option<&JobInstance> {
        self.instances
            .iter()
            .find(|instance| instance.job_name == job_name && instance.job_key == job_key)
    }

    fn executions_of(&self, instance_id: u64) -> impl Iterator<Item = &JobExecution> {
        self.executions
            .values()
            .rev()
            .filter(move |execution| execution.job_instance_id == instance_id)
    }
}

/// Job repository keeping everything in process memory.
///
/// A single mutex guards the whole state, which makes
/// [`JobRepository::create_job_execution`] atomic.
#[derive(Default)]
pub struct InMemoryJobRepository {
    state: Mutex<State>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, BatchError> {
        self.state
            .lock()
            .map_err(|_| BatchError::Repository("job repository lock poisoned".to_string()))
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create_job_execution(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
        restartable_if_complete: bool,
    ) -> Result<JobExecution, BatchError> {
        let job_key = job_parameters.job_key();
        let mut state = self.lock()?;

        let instance = match state.find_instance(job_name, &job_key) {
            Some(instance) => {
                let instance = instance.clone();
                check_can_start(
                    job_name,
                    &job_key,
                    state.executions_of(instance.id).map(|execution| &execution.status),
                    restartable_if_complete,
                )?;
                instance
            }
            None => {
                state.last_instance_id += 1;
                let instance = JobInstance {
                    id: state.last_instance_id,
                    job_name: job_name.to_string(),
                    job_key,
                };
                state.instances.push(instance.clone());
                debug!("Created job instance {} of job {}", instance.id, job_name);
                instance
            }
        };

        state.last_execution_id += 1;
        let execution = JobExecution::new(state.last_execution_id, &instance, job_parameters.clone());
        state.executions.insert(execution.id, execution.clone());

        Ok(execution)
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError> {
        let mut state = self.lock()?;

        match state.executions.get_mut(&execution.id) {
            Some(stored) => {
                check_transition(execution.id, stored.status, execution.status)?;
                *stored = execution.clone();
                Ok(())
            }
            None => Err(BatchError::Repository(format!(
                "unknown job execution {}",
                execution.id
            ))),
        }
    }

    fn get_job_execution(&self, id: u64) -> Result<Option<JobExecution>, BatchError> {
        Ok(self.lock()?.executions.get(&id).cloned())
    }

    fn get_job_instance(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError> {
        Ok(self
            .lock()?
            .find_instance(job_name, &job_parameters.job_key())
            .cloned())
    }

    fn get_last_job_instance(&self, job_name: &str) -> Result<Option<JobInstance>, BatchError> {
        Ok(self
            .lock()?
            .instances
            .iter()
            .rev()
            .find(|instance| instance.job_name == job_name)
            .cloned())
    }

    fn find_job_executions(&self, instance: &JobInstance) -> Result<Vec<JobExecution>, BatchError> {
        Ok(self.lock()?.executions_of(instance.id).cloned().collect())
    }
}
