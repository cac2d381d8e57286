//! The people import: a delimited file of names loaded into the `people` table.
//!
//! [`build_import_job`] is the job run at startup and on schedule;
//! [`build_chained_import_job`] chains a second, unprocessed load and fails the
//! run through [`FailOnFailureListener`] when a step fails.

use std::fmt;

use chrono::Local;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};

use crate::{
    BatchError,
    config::ImportConfig,
    core::{
        item::{ItemProcessor, ItemProcessorResult, PassThroughProcessor},
        job::{BatchStatus, Job, JobBuilder, JobExecution, JobResult},
        listener::{FailOnFailureListener, JobExecutionListener},
        parameters::{
            DefaultJobParametersValidator, JobParameters, JobParametersBuilder,
            JobParametersIncrementer, JobParametersValidator, RUN_ID_KEY, RunIdIncrementer,
        },
        repository::JobRepository,
        step::StepBuilder,
    },
    item::{csv::CsvItemReaderBuilder, rdbc::SqliteItemWriterBuilder},
};

/// Key of the parameter identifying a scheduled run.
pub const DATE_KEY: &str = "date";

const PEOPLE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS people (
    person_id INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name VARCHAR(20),
    last_name VARCHAR(20)
)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub first_name: String,
    pub last_name: String,
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "firstName: {}, lastName: {}", self.first_name, self.last_name)
    }
}

/// Creates the `people` table when it does not exist yet.
pub async fn create_people_table(pool: &Pool<Sqlite>) -> Result<(), BatchError> {
    sqlx::query(PEOPLE_SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| BatchError::Configuration(format!("unable to create people table: {}", e)))?;
    Ok(())
}

/// Parameters of a scheduled run: the current local time, so that every
/// firing targets a new job instance.
pub fn date_parameters() -> JobParameters {
    JobParametersBuilder::new()
        .add_string(DATE_KEY, &Local::now().naive_local().to_string())
        .to_job_parameters()
}

/// Trims names and rejects people without a first or last name.
#[derive(Debug, Default)]
pub struct PersonItemProcessor;

impl ItemProcessor<Person, Person> for PersonItemProcessor {
    fn process(&self, item: &Person) -> ItemProcessorResult<Person> {
        let person = Person {
            first_name: item.first_name.trim().to_string(),
            last_name: item.last_name.trim().to_string(),
        };

        if person.first_name.is_empty() || person.last_name.is_empty() {
            return Err(BatchError::ItemProcessor(format!(
                "incomplete name: ({})",
                item
            )));
        }

        debug!("Converting ({}) into ({})", item, person);
        Ok(Some(person))
    }
}

/// Logs the content of the `people` table once a run has completed.
pub struct JobCompletionNotificationListener {
    pool: Pool<Sqlite>,
}

impl JobCompletionNotificationListener {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

impl JobExecutionListener for JobCompletionNotificationListener {
    fn after_job(&self, execution: &JobExecution) -> Result<(), BatchError> {
        if execution.status != BatchStatus::Completed {
            return Ok(());
        }

        info!("!!! JOB FINISHED! Time to verify the results");

        let rows = crate::item::rdbc::block_on(
            sqlx::query("SELECT first_name, last_name FROM people").fetch_all(&self.pool),
        )
        .map_err(|e| BatchError::Listener(format!("unable to read people: {}", e)))?;

        for row in rows {
            let person = Person {
                first_name: row.try_get::<Option<String>, _>(0).ok().flatten().unwrap_or_default(),
                last_name: row.try_get::<Option<String>, _>(1).ok().flatten().unwrap_or_default(),
            };
            info!("Found <{}> in the database.", person);
        }
        Ok(())
    }
}

/// The people import job.
///
/// Reader, processor and writer are built for every execution, so concurrent
/// or successive runs never share a half-read file.
pub struct PeopleImportJob<'a> {
    name: String,
    config: &'a ImportConfig,
    pool: &'a Pool<Sqlite>,
    listeners: Vec<&'a dyn JobExecutionListener>,
    chained: bool,
    fail_on_listener_error: bool,
    validator: DefaultJobParametersValidator,
    incrementer: RunIdIncrementer,
}

impl<'a> PeopleImportJob<'a> {
    fn new(name: &str, config: &'a ImportConfig, pool: &'a Pool<Sqlite>) -> Self {
        Self {
            name: name.to_string(),
            config,
            pool,
            listeners: Vec::new(),
            chained: false,
            fail_on_listener_error: config.fail_on_listener_error,
            validator: DefaultJobParametersValidator::new(&[], &[DATE_KEY, RUN_ID_KEY]),
            incrementer: RunIdIncrementer,
        }
    }

    pub fn listener(mut self, listener: &'a dyn JobExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }
}

/// Single-step import, processing every person before it is inserted.
pub fn build_import_job<'a>(config: &'a ImportConfig, pool: &'a Pool<Sqlite>) -> PeopleImportJob<'a> {
    PeopleImportJob::new(&config.job_name, config, pool)
}

/// Two-step import; a failed run is reported as a listener error.
pub fn build_chained_import_job<'a>(
    config: &'a ImportConfig,
    pool: &'a Pool<Sqlite>,
) -> PeopleImportJob<'a> {
    let mut job = PeopleImportJob::new(&format!("{}2", config.job_name), config, pool)
        .listener(&FailOnFailureListener);
    job.chained = true;
    job.fail_on_listener_error = true;
    job
}

impl Job for PeopleImportJob<'_> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn validate_parameters(&self, parameters: &JobParameters) -> Result<(), BatchError> {
        if parameters.is_empty() {
            return Err(BatchError::InvalidJobParameters(format!(
                "job {} needs a '{}' or '{}' parameter",
                self.name, DATE_KEY, RUN_ID_KEY
            )));
        }
        self.validator.validate(parameters)
    }

    fn get_incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        Some(&self.incrementer)
    }

    fn execute(&self, execution: &mut JobExecution, repository: &dyn JobRepository) -> JobResult<()> {
        let names: Vec<&str> = self.config.names.iter().map(String::as_str).collect();

        let reader = CsvItemReaderBuilder::new()
            .delimiter(self.config.delimiter_byte()?)
            .names(&names)
            .from_path(&self.config.input);
        let processor = PersonItemProcessor;
        let writer = SqliteItemWriterBuilder::<Person>::new()
            .pool(self.pool)
            .sql(&self.config.sql)
            .build()?;

        let step1 = StepBuilder::new("step1")
            .chunk::<Person, Person>(self.config.chunk_size)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .skip_limit(self.config.skip_limit)
            .build()?;

        let step2 = StepBuilder::new("step2")
            .chunk::<Person, Person>(self.config.chunk_size)
            .reader(&reader)
            .processor(&PassThroughProcessor)
            .writer(&writer)
            .skip_limit(self.config.skip_limit)
            .build()?;

        let mut builder = JobBuilder::new()
            .name(&self.name)
            .start(&step1)
            .fail_on_listener_error(self.fail_on_listener_error);
        if self.chained {
            builder = builder.next(&step2);
        }
        for listener in &self.listeners {
            builder = builder.listener(*listener);
        }

        builder.build().execute(execution, repository)
    }
}

#[cfg(test)]
mod tests {
    use crate::BatchError;
    use crate::core::item::ItemProcessor;
    use crate::core::parameters::{JobParametersBuilder, RUN_ID_KEY};

    use super::{DATE_KEY, Person, PersonItemProcessor, date_parameters};

    fn person(first_name: &str, last_name: &str) -> Person {
        Person {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        }
    }

    #[test]
    fn processor_trims_names() {
        let processor = PersonItemProcessor;

        let result = processor.process(&person(" Jill ", "Doe  "));

        assert_eq!(result, Ok(Some(person("Jill", "Doe"))));
    }

    #[test]
    fn processor_rejects_missing_names() {
        let processor = PersonItemProcessor;

        assert!(matches!(
            processor.process(&person("Jill", "  ")),
            Err(BatchError::ItemProcessor(_))
        ));
        assert!(matches!(
            processor.process(&person("", "Doe")),
            Err(BatchError::ItemProcessor(_))
        ));
    }

    #[test]
    fn person_is_bound_by_property_name() {
        let value = serde_json::to_value(person("Jill", "Doe")).unwrap();

        assert_eq!(value["firstName"], "Jill");
        assert_eq!(value["lastName"], "Doe");
    }

    #[test]
    fn scheduled_parameters_carry_the_date() {
        let parameters = date_parameters();

        assert_eq!(parameters.len(), 1);
        assert!(parameters.get_string(DATE_KEY).is_some());

        let next = JobParametersBuilder::from_parameters(&parameters)
            .add_long(RUN_ID_KEY, 1)
            .to_job_parameters();
        assert_ne!(next.job_key(), parameters.job_key());
    }
}
