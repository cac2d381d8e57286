use std::future::Future;

use serde::Serialize;
use serde_json::Value;

use crate::BatchError;

#[cfg(feature = "rdbc-sqlite")]
pub mod sqlite_writer;

#[cfg(feature = "rdbc-sqlite")]
pub use sqlite_writer::{SqliteItemWriter, SqliteItemWriterBuilder};

/// Runs a database future to completion from synchronous batch code.
///
/// Must be called from a multi-threaded tokio runtime.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}

/// SQL statement with named parameters such as `:firstName`.
///
/// The statement is rewritten with positional `?` placeholders and the
/// parameter names are kept in order of appearance. String literals, quoted
/// identifiers, comments and `::` casts are left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedParameterSql {
    sql: String,
    names: Vec<String>,
}

impl NamedParameterSql {
    pub fn parse(statement: &str) -> Result<Self, BatchError> {
        if statement.trim().is_empty() {
            return Err(BatchError::Configuration("SQL statement is empty".to_string()));
        }

        let mut sql = String::with_capacity(statement.len());
        let mut names = Vec::new();
        let mut chars = statement.chars().peekable();
        // Quote character of the literal or identifier being copied
        let mut quote: Option<char> = None;

        while let Some(c) = chars.next() {
            if let Some(open) = quote {
                if c == open {
                    quote = None;
                }
                sql.push(c);
                continue;
            }

            match c {
                '\'' | '"' => {
                    quote = Some(c);
                    sql.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    sql.push(c);
                    for next in chars.by_ref() {
                        sql.push(next);
                        if next == '\n' {
                            break;
                        }
                    }
                }
                '/' if chars.peek() == Some(&'*') => {
                    sql.push(c);
                    sql.push('*');
                    chars.next();
                    let mut previous = ' ';
                    for next in chars.by_ref() {
                        sql.push(next);
                        if previous == '*' && next == '/' {
                            break;
                        }
                        previous = next;
                    }
                }
                ':' => match chars.peek() {
                    Some(':') => {
                        sql.push_str("::");
                        chars.next();
                    }
                    Some(&next) if next.is_ascii_alphabetic() || next == '_' => {
                        let mut name = String::new();
                        while let Some(&next) = chars.peek() {
                            if next.is_ascii_alphanumeric() || next == '_' {
                                name.push(next);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        names.push(name);
                        sql.push('?');
                    }
                    _ => sql.push(c),
                },
                _ => sql.push(c),
            }
        }

        if let Some(open) = quote {
            return Err(BatchError::Configuration(format!(
                "unterminated {} in SQL statement: {}",
                if open == '"' { "quoted identifier" } else { "string literal" },
                statement
            )));
        }

        Ok(Self { sql, names })
    }

    /// Statement with positional placeholders.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter names, one per placeholder.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Values of the parameters for `item`, in placeholder order.
    ///
    /// Parameters are looked up by property name in the serialized item.
    pub fn values<T: Serialize>(&self, item: &T) -> Result<Vec<Value>, BatchError> {
        let properties = match serde_json::to_value(item) {
            Ok(Value::Object(properties)) => properties,
            Ok(other) => {
                return Err(BatchError::ItemWriter(format!(
                    "item has no named properties: {}",
                    other
                )));
            }
            Err(e) => return Err(BatchError::ItemWriter(e.to_string())),
        };

        self.names
            .iter()
            .map(|name| {
                properties.get(name).cloned().ok_or_else(|| {
                    BatchError::ItemWriter(format!("no property named '{}' on item", name))
                })
            })
            .collect()
    }
}
