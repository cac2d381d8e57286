use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use log::info;
use serde::Serialize;

use crate::BatchError;

use super::{
    job::{BatchStatus, JobExecution},
    listener::JobExecutionListener,
};

/// Detail key carrying the last observed batch status of an unhealthy job.
pub const ERROR_CODE_DETAIL: &str = "Error Code";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

/// Result of a health query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Health {
    pub fn up() -> Self {
        Self {
            status: HealthStatus::Up,
            details: BTreeMap::new(),
        }
    }

    pub fn down() -> Self {
        Self {
            status: HealthStatus::Down,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == HealthStatus::Up
    }

    pub fn to_json(&self) -> Result<String, BatchError> {
        serde_json::to_string(self).map_err(|e| BatchError::Configuration(e.to_string()))
    }
}

/// Health of a job, derived from the status of its last run.
///
/// The job is healthy only when the last observed status is `COMPLETED`;
/// before any run the status is `UNKNOWN`. Registered as a job listener, the
/// indicator follows every run; it can also be set by hand.
#[derive(Debug)]
pub struct JobHealthIndicator {
    batch_status: RwLock<BatchStatus>,
}

impl Default for JobHealthIndicator {
    fn default() -> Self {
        Self {
            batch_status: RwLock::new(BatchStatus::Unknown),
        }
    }
}

impl JobHealthIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_status(&self) -> BatchStatus {
        *self
            .batch_status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn health(&self) -> Health {
        match self.batch_status() {
            BatchStatus::Completed => Health::up(),
            other => Health::down().with_detail(ERROR_CODE_DETAIL, other.as_str()),
        }
    }

    pub fn set_batch_status(&self, batch_status: BatchStatus) {
        *self
            .batch_status
            .write()
            .unwrap_or_else(PoisonError::into_inner) = batch_status;
    }

    /// Administrative override, e.g. `set_batch_status_str("COMPLETED")`.
    pub fn set_batch_status_str(&self, batch_status: &str) -> Result<(), BatchError> {
        let batch_status = batch_status.parse::<BatchStatus>()?;
        info!("Batch status overridden to {}", batch_status);
        self.set_batch_status(batch_status);
        Ok(())
    }
}

impl JobExecutionListener for JobHealthIndicator {
    fn after_job(&self, execution: &JobExecution) -> Result<(), BatchError> {
        self.set_batch_status(execution.status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::job::BatchStatus;

    use super::{ERROR_CODE_DETAIL, Health, HealthStatus, JobHealthIndicator};

    #[test]
    fn unknown_before_any_run() {
        let indicator = JobHealthIndicator::new();

        let health = indicator.health();

        assert_eq!(health.status, HealthStatus::Down);
        assert_eq!(
            health.details.get(ERROR_CODE_DETAIL).map(String::as_str),
            Some("UNKNOWN")
        );
    }

    #[test]
    fn only_completed_is_healthy() {
        let indicator = JobHealthIndicator::new();

        indicator.set_batch_status(BatchStatus::Completed);
        assert_eq!(indicator.health(), Health::up());

        indicator.set_batch_status(BatchStatus::Stopped);
        assert_eq!(
            indicator.health(),
            Health::down().with_detail(ERROR_CODE_DETAIL, "STOPPED")
        );
    }

    #[test]
    fn status_can_be_overridden_by_name() {
        let indicator = JobHealthIndicator::new();

        indicator.set_batch_status_str("COMPLETED").unwrap();
        assert!(indicator.health().is_up());

        assert!(indicator.set_batch_status_str("GREEN").is_err());
        assert_eq!(indicator.batch_status(), BatchStatus::Completed);
    }

    #[test]
    fn health_serializes_like_an_actuator_payload() {
        assert_eq!(Health::up().to_json().unwrap(), r#"{"status":"UP"}"#);
        assert_eq!(
            Health::down()
                .with_detail(ERROR_CODE_DETAIL, "FAILED")
                .to_json()
                .unwrap(),
            r#"{"status":"DOWN","details":{"Error Code":"FAILED"}}"#
        );
    }
}
