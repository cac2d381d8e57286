//! Settings of the people import application.
//!
//! Loaded from a TOML file; every key is optional and defaults to the values
//! of the stock import (`data/sample-data.csv` into `people`, every midnight).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::BatchError;

/// Configuration of the import job, its trigger and its health output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportConfig {
    #[serde(default = "default_job_name")]
    pub job_name: String,

    /// Delimited file to import
    #[serde(default = "default_input")]
    pub input: PathBuf,

    /// Field separator, a single ASCII character
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Names of the fields of a line, bound to the properties of a person
    #[serde(default = "default_names")]
    pub names: Vec<String>,

    /// Statement executed for every person, with `:property` placeholders
    #[serde(default = "default_sql")]
    pub sql: String,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of unreadable or rejected lines tolerated per run
    #[serde(default)]
    pub skip_limit: usize,

    /// Schedule of the recurring import, with a seconds field
    #[serde(default = "default_cron")]
    pub cron: String,

    #[serde(default = "default_true")]
    pub run_on_startup: bool,

    /// File receiving the JSON health after every run
    #[serde(default)]
    pub health_file: Option<PathBuf>,

    #[serde(default)]
    pub fail_on_listener_error: bool,
}

fn default_job_name() -> String {
    "importUserJob".to_string()
}

fn default_input() -> PathBuf {
    PathBuf::from("data/sample-data.csv")
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_names() -> Vec<String> {
    vec!["firstName".to_string(), "lastName".to_string()]
}

fn default_sql() -> String {
    "INSERT INTO people (first_name, last_name) VALUES (:firstName, :lastName)".to_string()
}

fn default_database_url() -> String {
    "sqlite://people.db".to_string()
}

fn default_chunk_size() -> usize {
    10
}

fn default_cron() -> String {
    "0 0 0 * * *".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            job_name: default_job_name(),
            input: default_input(),
            delimiter: default_delimiter(),
            names: default_names(),
            sql: default_sql(),
            database_url: default_database_url(),
            chunk_size: default_chunk_size(),
            skip_limit: 0,
            cron: default_cron(),
            run_on_startup: true,
            health_file: None,
            fail_on_listener_error: false,
        }
    }
}

impl ImportConfig {
    pub fn from_file(path: &Path) -> Result<Self, BatchError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BatchError::Configuration(format!("unable to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, BatchError> {
        toml::from_str(contents).map_err(|e| BatchError::Configuration(e.to_string()))
    }

    pub fn delimiter_byte(&self) -> Result<u8, BatchError> {
        match self.delimiter.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(BatchError::Configuration(format!(
                "delimiter must be a single ASCII character, got '{}'",
                self.delimiter
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.job_name.trim().is_empty() {
            return Err(BatchError::Configuration("job_name must not be empty".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration("chunk_size must be > 0".to_string()));
        }
        if self.names.is_empty() {
            return Err(BatchError::Configuration("names must not be empty".to_string()));
        }
        self.delimiter_byte()?;
        cron::Schedule::from_str(&self.cron).map_err(|e| {
            BatchError::Configuration(format!("invalid cron expression '{}': {}", self.cron, e))
        })?;
        Ok(())
    }
}
