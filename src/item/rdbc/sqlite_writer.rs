use log::{debug, error};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Pool, Sqlite, query::Query, sqlite::SqliteArguments};

use crate::BatchError;
use crate::core::item::{ItemWriter, ItemWriterResult};

use super::{NamedParameterSql, block_on};

/// A writer executing a parameterized SQL statement once per item against SQLite.
///
/// Each chunk runs in its own transaction: either every statement of the chunk
/// is committed or none is. Parameters are named after the properties of the
/// serialized item, e.g. `INSERT INTO people (first_name) VALUES (:firstName)`.
///
/// With `assert_updates` (the default), a statement that affects no row fails
/// the whole chunk.
pub struct SqliteItemWriter<'a, O> {
    pool: &'a Pool<Sqlite>,
    statement: NamedParameterSql,
    assert_updates: bool,
    _item: std::marker::PhantomData<fn(&O)>,
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(value) => query.bind(value),
        Value::Number(number) => match number.as_i64() {
            Some(value) => query.bind(value),
            None => query.bind(number.as_f64()),
        },
        Value::String(value) => query.bind(value),
        other => query.bind(other.to_string()),
    }
}

impl<O: Serialize> SqliteItemWriter<'_, O> {
    async fn write_in_transaction(&self, rows: Vec<Vec<Value>>) -> Result<u64, BatchError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BatchError::ItemWriter(format!("SQLite write failed: {}", e)))?;

        let mut affected = 0;
        for (index, values) in rows.into_iter().enumerate() {
            let query = values
                .into_iter()
                .fold(sqlx::query(self.statement.sql()), bind_value);

            let result = query
                .execute(&mut *tx)
                .await
                .map_err(|e| BatchError::ItemWriter(format!("SQLite write failed: {}", e)))?;

            if self.assert_updates && result.rows_affected() == 0 {
                return Err(BatchError::ItemWriter(format!(
                    "item {} of the chunk did not update any row",
                    index
                )));
            }
            affected += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| BatchError::ItemWriter(format!("SQLite commit failed: {}", e)))?;

        Ok(affected)
    }
}

impl<O: Serialize> ItemWriter<O> for SqliteItemWriter<'_, O> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        if items.is_empty() {
            return Ok(());
        }

        let rows = items
            .iter()
            .map(|item| self.statement.values(item))
            .collect::<Result<Vec<_>, _>>()?;

        match block_on(self.write_in_transaction(rows)) {
            Ok(affected) => {
                debug!(
                    "Committed {} items ({} rows affected) to SQLite",
                    items.len(),
                    affected
                );
                Ok(())
            }
            Err(e) => {
                // The transaction is dropped uncommitted, hence rolled back
                error!("Rolled back chunk of {} items: {}", items.len(), e);
                Err(e)
            }
        }
    }
}

/// Builder for [`SqliteItemWriter`].
///
/// # Example
///
/// ```rust,no_run,compile_fail
/// let writer = SqliteItemWriterBuilder::<Person>::new()
///     .pool(&pool)
///     .sql("INSERT INTO people (first_name, last_name) VALUES (:firstName, :lastName)")
///     .build()?;
/// ```
pub struct SqliteItemWriterBuilder<'a, O> {
    pool: Option<&'a Pool<Sqlite>>,
    sql: Option<String>,
    assert_updates: bool,
    _item: std::marker::PhantomData<fn(&O)>,
}

impl<O> Default for SqliteItemWriterBuilder<'_, O> {
    fn default() -> Self {
        Self {
            pool: None,
            sql: None,
            assert_updates: true,
            _item: std::marker::PhantomData,
        }
    }
}

impl<'a, O> SqliteItemWriterBuilder<'a, O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(mut self, pool: &'a Pool<Sqlite>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Statement executed for every item, with `:property` placeholders.
    pub fn sql(mut self, sql: &str) -> Self {
        self.sql = Some(sql.to_string());
        self
    }

    /// Whether a statement affecting no row is an error. Defaults to true.
    pub fn assert_updates(mut self, assert_updates: bool) -> Self {
        self.assert_updates = assert_updates;
        self
    }

    pub fn build(self) -> Result<SqliteItemWriter<'a, O>, BatchError> {
        let pool = self.pool.ok_or_else(|| {
            BatchError::Configuration("a pool is required for building the SQLite writer".to_string())
        })?;
        let sql = self.sql.ok_or_else(|| {
            BatchError::Configuration("a SQL statement is required for building the SQLite writer".to_string())
        })?;

        Ok(SqliteItemWriter {
            pool,
            statement: NamedParameterSql::parse(&sql)?,
            assert_updates: self.assert_updates,
            _item: std::marker::PhantomData,
        })
    }
}
