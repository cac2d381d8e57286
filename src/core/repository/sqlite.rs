use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{Pool, Row, Sqlite, sqlite::SqliteRow};

use crate::BatchError;
use crate::core::{
    job::{BatchStatus, ExitStatus, JobExecution, JobInstance},
    parameters::JobParameters,
    step::{StepExecution, StepStatus},
};
use crate::item::rdbc::block_on;

use super::{JobRepository, check_can_start, check_transition, predecessors};

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS batch_job_instance (
        job_instance_id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_name TEXT NOT NULL,
        job_key TEXT NOT NULL,
        UNIQUE (job_name, job_key)
    )",
    "CREATE TABLE IF NOT EXISTS batch_job_execution (
        job_execution_id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_instance_id INTEGER NOT NULL REFERENCES batch_job_instance (job_instance_id),
        job_parameters TEXT NOT NULL,
        status TEXT NOT NULL,
        exit_code TEXT NOT NULL,
        exit_description TEXT NOT NULL,
        create_time TEXT NOT NULL,
        start_time TEXT,
        end_time TEXT
    )",
    // At most one running execution per instance, enforced by the database
    "CREATE UNIQUE INDEX IF NOT EXISTS batch_job_execution_running
        ON batch_job_execution (job_instance_id)
        WHERE status IN ('STARTING', 'STARTED')",
    "CREATE TABLE IF NOT EXISTS batch_step_execution (
        step_execution_id TEXT PRIMARY KEY,
        job_execution_id INTEGER NOT NULL REFERENCES batch_job_execution (job_execution_id),
        position INTEGER NOT NULL,
        step_name TEXT NOT NULL,
        status TEXT NOT NULL,
        start_time TEXT,
        end_time TEXT,
        read_count INTEGER NOT NULL,
        write_count INTEGER NOT NULL,
        read_skip_count INTEGER NOT NULL,
        process_skip_count INTEGER NOT NULL,
        filter_count INTEGER NOT NULL,
        commit_count INTEGER NOT NULL,
        rollback_count INTEGER NOT NULL,
        commit_position INTEGER NOT NULL DEFAULT 0,
        exit_description TEXT NOT NULL
    )",
];

fn repository_error(error: impl std::fmt::Display) -> BatchError {
    BatchError::Repository(error.to_string())
}

fn to_text(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(|t| t.to_rfc3339())
}

fn from_text(text: Option<String>) -> Result<Option<DateTime<Utc>>, BatchError> {
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|t| t.with_timezone(&Utc))
            .map_err(repository_error)
    })
    .transpose()
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_usize(row: &SqliteRow, column: &str) -> Result<usize, BatchError> {
    let value: i64 = row.try_get(column).map_err(repository_error)?;
    usize::try_from(value).map_err(repository_error)
}

/// Job repository persisting instances, executions and step executions in SQLite.
///
/// Tables are created by [`SqliteJobRepository::initialize`]. A partial unique
/// index on running executions makes the creation of an execution an atomic
/// insert-if-absent, even across processes sharing the database file.
///
/// Like the SQLite item writer, calls block on the current tokio runtime and
/// must run on a multi-threaded runtime or on its blocking pool.
pub struct SqliteJobRepository {
    pool: Pool<Sqlite>,
}

impl SqliteJobRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Creates the repository tables when they do not exist yet.
    pub async fn initialize(&self) -> Result<(), BatchError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(repository_error)?;
        }
        Ok(())
    }

    async fn load_steps(&self, job_execution_id: i64) -> Result<Vec<StepExecution>, BatchError> {
        let rows = sqlx::query(
            "SELECT * FROM batch_step_execution WHERE job_execution_id = ? ORDER BY position",
        )
        .bind(job_execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(repository_error)?;

        rows.iter()
            .map(|row| -> Result<StepExecution, BatchError> {
                let id: String = row.try_get("step_execution_id").map_err(repository_error)?;
                let status: String = row.try_get("status").map_err(repository_error)?;
                Ok(StepExecution {
                    id: id.parse().map_err(repository_error)?,
                    name: row.try_get("step_name").map_err(repository_error)?,
                    status: StepStatus::from_str(&status)?,
                    start_time: from_text(row.try_get("start_time").map_err(repository_error)?)?,
                    end_time: from_text(row.try_get("end_time").map_err(repository_error)?)?,
                    read_count: to_usize(row, "read_count")?,
                    write_count: to_usize(row, "write_count")?,
                    read_skip_count: to_usize(row, "read_skip_count")?,
                    process_skip_count: to_usize(row, "process_skip_count")?,
                    filter_count: to_usize(row, "filter_count")?,
                    commit_count: to_usize(row, "commit_count")?,
                    rollback_count: to_usize(row, "rollback_count")?,
                    commit_position: to_usize(row, "commit_position")?,
                    exit_description: row.try_get("exit_description").map_err(repository_error)?,
                })
            })
            .collect()
    }

    async fn load_execution(&self, row: &SqliteRow) -> Result<JobExecution, BatchError> {
        let id: i64 = row.try_get("job_execution_id").map_err(repository_error)?;
        let instance_id: i64 = row.try_get("job_instance_id").map_err(repository_error)?;
        let parameters: String = row.try_get("job_parameters").map_err(repository_error)?;
        let status: String = row.try_get("status").map_err(repository_error)?;
        let create_time: String = row.try_get("create_time").map_err(repository_error)?;
        let exit_code: String = row.try_get("exit_code").map_err(repository_error)?;
        let exit_description: String = row.try_get("exit_description").map_err(repository_error)?;

        Ok(JobExecution {
            id: id as u64,
            job_instance_id: instance_id as u64,
            job_name: row.try_get("job_name").map_err(repository_error)?,
            job_parameters: serde_json::from_str(&parameters).map_err(repository_error)?,
            status: BatchStatus::from_str(&status)?,
            exit_status: ExitStatus::new(&exit_code, &exit_description),
            create_time: from_text(Some(create_time))?.unwrap_or_else(Utc::now),
            start_time: from_text(row.try_get("start_time").map_err(repository_error)?)?,
            end_time: from_text(row.try_get("end_time").map_err(repository_error)?)?,
            step_executions: self.load_steps(id).await?,
        })
    }

    fn instance_from_row(row: &SqliteRow) -> Result<JobInstance, BatchError> {
        let id: i64 = row.try_get("job_instance_id").map_err(repository_error)?;
        Ok(JobInstance {
            id: id as u64,
            job_name: row.try_get("job_name").map_err(repository_error)?,
            job_key: row.try_get("job_key").map_err(repository_error)?,
        })
    }
}

const SELECT_EXECUTION: &str = "SELECT e.*, i.job_name FROM batch_job_execution e \
     JOIN batch_job_instance i ON i.job_instance_id = e.job_instance_id";

impl JobRepository for SqliteJobRepository {
    fn create_job_execution(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
        restartable_if_complete: bool,
    ) -> Result<JobExecution, BatchError> {
        let job_key = job_parameters.job_key();
        let serialized = serde_json::to_string(job_parameters).map_err(repository_error)?;

        block_on(async {
            let mut tx = self.pool.begin().await.map_err(repository_error)?;

            sqlx::query("INSERT OR IGNORE INTO batch_job_instance (job_name, job_key) VALUES (?, ?)")
                .bind(job_name)
                .bind(&job_key)
                .execute(&mut *tx)
                .await
                .map_err(repository_error)?;

            let row = sqlx::query(
                "SELECT * FROM batch_job_instance WHERE job_name = ? AND job_key = ?",
            )
            .bind(job_name)
            .bind(&job_key)
            .fetch_one(&mut *tx)
            .await
            .map_err(repository_error)?;
            let instance = Self::instance_from_row(&row)?;

            let statuses: Vec<String> =
                sqlx::query_scalar("SELECT status FROM batch_job_execution WHERE job_instance_id = ?")
                    .bind(instance.id as i64)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(repository_error)?;
            let statuses = statuses
                .iter()
                .map(|status| BatchStatus::from_str(status))
                .collect::<Result<Vec<_>, _>>()?;

            // Returning early drops the transaction, which rolls it back
            check_can_start(job_name, &job_key, &statuses, restartable_if_complete)?;

            let mut execution = JobExecution::new(0, &instance, job_parameters.clone());
            let inserted = sqlx::query(
                "INSERT INTO batch_job_execution \
                 (job_instance_id, job_parameters, status, exit_code, exit_description, create_time) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(instance.id as i64)
            .bind(&serialized)
            .bind(execution.status.as_str())
            .bind(&execution.exit_status.exit_code)
            .bind(&execution.exit_status.exit_description)
            .bind(execution.create_time.to_rfc3339())
            .execute(&mut *tx)
            .await;

            let inserted = match inserted {
                Ok(result) => result,
                Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                    return Err(BatchError::JobExecutionAlreadyRunning(format!(
                        "job {} with parameters {{{}}}",
                        job_name, job_key
                    )));
                }
                Err(error) => return Err(repository_error(error)),
            };

            tx.commit().await.map_err(repository_error)?;

            execution.id = inserted.last_insert_rowid() as u64;
            debug!(
                "Created job execution {} of instance {} ({})",
                execution.id, instance.id, job_name
            );
            Ok::<_, BatchError>(execution)
        })
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError> {
        let allowed = predecessors(execution.status);
        let guarded_update = format!(
            "UPDATE batch_job_execution SET status = ?, exit_code = ?, exit_description = ?, \
             start_time = ?, end_time = ? WHERE job_execution_id = ? AND status IN ({})",
            vec!["?"; allowed.len()].join(", ")
        );

        block_on(async {
            let mut tx = self.pool.begin().await.map_err(repository_error)?;

            // Writing first takes the write lock before anything is read
            let mut update = sqlx::query(&guarded_update)
                .bind(execution.status.as_str())
                .bind(&execution.exit_status.exit_code)
                .bind(&execution.exit_status.exit_description)
                .bind(to_text(execution.start_time))
                .bind(to_text(execution.end_time))
                .bind(execution.id as i64);
            for status in &allowed {
                update = update.bind(status.as_str());
            }
            let updated = update.execute(&mut *tx).await.map_err(repository_error)?;

            if updated.rows_affected() == 0 {
                let stored: Option<String> = sqlx::query_scalar(
                    "SELECT status FROM batch_job_execution WHERE job_execution_id = ?",
                )
                .bind(execution.id as i64)
                .fetch_optional(&mut *tx)
                .await
                .map_err(repository_error)?;

                return match stored {
                    Some(status) => {
                        check_transition(execution.id, BatchStatus::from_str(&status)?, execution.status)?;
                        Err(BatchError::Repository(format!(
                            "job execution {} was not updated",
                            execution.id
                        )))
                    }
                    None => Err(BatchError::Repository(format!(
                        "unknown job execution {}",
                        execution.id
                    ))),
                };
            }

            for (position, step) in execution.step_executions.iter().enumerate() {
                sqlx::query(
                    "INSERT OR REPLACE INTO batch_step_execution \
                     (step_execution_id, job_execution_id, position, step_name, status, start_time, \
                     end_time, read_count, write_count, read_skip_count, process_skip_count, \
                     filter_count, commit_count, rollback_count, commit_position, \
                     exit_description) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(step.id.to_string())
                .bind(execution.id as i64)
                .bind(to_i64(position))
                .bind(&step.name)
                .bind(step.status.as_str())
                .bind(to_text(step.start_time))
                .bind(to_text(step.end_time))
                .bind(to_i64(step.read_count))
                .bind(to_i64(step.write_count))
                .bind(to_i64(step.read_skip_count))
                .bind(to_i64(step.process_skip_count))
                .bind(to_i64(step.filter_count))
                .bind(to_i64(step.commit_count))
                .bind(to_i64(step.rollback_count))
                .bind(to_i64(step.commit_position))
                .bind(&step.exit_description)
                .execute(&mut *tx)
                .await
                .map_err(repository_error)?;
            }

            tx.commit().await.map_err(repository_error)
        })
    }

    fn get_job_execution(&self, id: u64) -> Result<Option<JobExecution>, BatchError> {
        block_on(async {
            let row = sqlx::query(&format!("{} WHERE e.job_execution_id = ?", SELECT_EXECUTION))
                .bind(id as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(repository_error)?;

            let execution = match row {
                Some(row) => Some(self.load_execution(&row).await?),
                None => None,
            };
            Ok::<_, BatchError>(execution)
        })
    }

    fn get_job_instance(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError> {
        let job_key = job_parameters.job_key();
        block_on(async {
            sqlx::query("SELECT * FROM batch_job_instance WHERE job_name = ? AND job_key = ?")
                .bind(job_name)
                .bind(&job_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(repository_error)?
                .map(|row| Self::instance_from_row(&row))
                .transpose()
        })
    }

    fn get_last_job_instance(&self, job_name: &str) -> Result<Option<JobInstance>, BatchError> {
        block_on(async {
            sqlx::query(
                "SELECT * FROM batch_job_instance WHERE job_name = ? \
                 ORDER BY job_instance_id DESC LIMIT 1",
            )
            .bind(job_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(repository_error)?
            .map(|row| Self::instance_from_row(&row))
            .transpose()
        })
    }

    fn find_job_executions(&self, instance: &JobInstance) -> Result<Vec<JobExecution>, BatchError> {
        block_on(async {
            let rows = sqlx::query(&format!(
                "{} WHERE e.job_instance_id = ? ORDER BY e.job_execution_id DESC",
                SELECT_EXECUTION
            ))
            .bind(instance.id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(repository_error)?;

            let mut executions = Vec::with_capacity(rows.len());
            for row in &rows {
                executions.push(self.load_execution(row).await?);
            }
            Ok::<_, BatchError>(executions)
        })
    }
}
