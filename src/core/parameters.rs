use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BatchError;

/// Key added by [`RunIdIncrementer`].
pub const RUN_ID_KEY: &str = "run.id";

/// A single scalar job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobParameter {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl JobParameter {
    fn type_name(&self) -> &'static str {
        match self {
            JobParameter::String(_) => "STRING",
            JobParameter::Long(_) => "LONG",
            JobParameter::Double(_) => "DOUBLE",
            JobParameter::Date(_) => "DATE",
        }
    }
}

impl fmt::Display for JobParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobParameter::String(value) => write!(f, "{}", value),
            JobParameter::Long(value) => write!(f, "{}", value),
            JobParameter::Double(value) => write!(f, "{}", value),
            JobParameter::Date(value) => write!(f, "{}", value.to_rfc3339()),
        }
    }
}

/// Parameters identifying a job instance.
///
/// Two sets of parameters with the same keys and values designate the same
/// job instance, whatever the insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.parameters.get(key) {
            Some(JobParameter::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.parameters.get(key) {
            Some(JobParameter::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Canonical representation used to look up the job instance.
    pub fn job_key(&self) -> String {
        self.parameters
            .iter()
            .map(|(key, value)| format!("{}={}:{}", key, value.type_name(), value))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.job_key())
    }
}

#[derive(Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a copy of existing parameters.
    pub fn from_parameters(parameters: &JobParameters) -> Self {
        Self {
            parameters: parameters.parameters.clone(),
        }
    }

    pub fn add_string(mut self, key: &str, value: &str) -> Self {
        self.parameters
            .insert(key.to_string(), JobParameter::String(value.to_string()));
        self
    }

    pub fn add_long(mut self, key: &str, value: i64) -> Self {
        self.parameters
            .insert(key.to_string(), JobParameter::Long(value));
        self
    }

    pub fn add_double(mut self, key: &str, value: f64) -> Self {
        self.parameters
            .insert(key.to_string(), JobParameter::Double(value));
        self
    }

    pub fn add_date(mut self, key: &str, value: DateTime<Utc>) -> Self {
        self.parameters
            .insert(key.to_string(), JobParameter::Date(value));
        self
    }

    pub fn to_job_parameters(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}

/// Checks the parameters of a run before any instance is created.
pub trait JobParametersValidator {
    fn validate(&self, parameters: &JobParameters) -> Result<(), BatchError>;
}

/// Validator with required and optional keys.
///
/// Every required key must be present. When optional keys are declared, any
/// key that is neither required nor optional is rejected.
#[derive(Debug, Default, Clone)]
pub struct DefaultJobParametersValidator {
    required_keys: BTreeSet<String>,
    optional_keys: BTreeSet<String>,
}

impl DefaultJobParametersValidator {
    pub fn new(required_keys: &[&str], optional_keys: &[&str]) -> Self {
        Self {
            required_keys: required_keys.iter().map(|k| k.to_string()).collect(),
            optional_keys: optional_keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl JobParametersValidator for DefaultJobParametersValidator {
    fn validate(&self, parameters: &JobParameters) -> Result<(), BatchError> {
        let missing: Vec<&str> = self
            .required_keys
            .iter()
            .filter(|key| parameters.get(key).is_none())
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            return Err(BatchError::InvalidJobParameters(format!(
                "missing required keys: {}",
                missing.join(", ")
            )));
        }

        if !self.optional_keys.is_empty() {
            let unexpected: Vec<&str> = parameters
                .keys()
                .filter(|key| !self.required_keys.contains(*key) && !self.optional_keys.contains(*key))
                .collect();

            if !unexpected.is_empty() {
                return Err(BatchError::InvalidJobParameters(format!(
                    "unexpected keys: {}",
                    unexpected.join(", ")
                )));
            }
        }

        Ok(())
    }
}

/// Derives the parameters of the next job instance from the previous ones.
pub trait JobParametersIncrementer {
    fn get_next(&self, previous: Option<&JobParameters>) -> JobParameters;
}

/// Increments the `run.id` parameter, keeping the other previous parameters.
#[derive(Debug, Default, Clone)]
pub struct RunIdIncrementer;

impl JobParametersIncrementer for RunIdIncrementer {
    fn get_next(&self, previous: Option<&JobParameters>) -> JobParameters {
        match previous {
            Some(parameters) => {
                let run_id = parameters.get_long(RUN_ID_KEY).unwrap_or(0) + 1;
                JobParametersBuilder::from_parameters(parameters)
                    .add_long(RUN_ID_KEY, run_id)
                    .to_job_parameters()
            }
            None => JobParametersBuilder::new()
                .add_long(RUN_ID_KEY, 1)
                .to_job_parameters(),
        }
    }
}
