#![allow(dead_code)]

pub mod mocks;

use std::io::Write;

use batch_import::{config::ImportConfig, people::Person};
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tempfile::NamedTempFile;

pub use mocks::MockPersonWriter;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn person(first_name: &str, last_name: &str) -> Person {
    Person {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
    }
}

/// Input file with one line per entry.
pub fn input_file<S: AsRef<str>>(lines: &[S]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temporary input");
    for line in lines {
        writeln!(file, "{}", line.as_ref()).expect("input line");
    }
    file
}

/// `count` well-formed lines: `First0,Doe`, `First1,Doe`...
pub fn people_lines(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("First{},Doe", i)).collect()
}

pub async fn sqlite_pool(database: &NamedTempFile) -> Pool<Sqlite> {
    let options = SqliteConnectOptions::new()
        .filename(database.path())
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .expect("sqlite pool")
}

pub fn config_for(input: &NamedTempFile) -> ImportConfig {
    ImportConfig {
        input: input.path().to_path_buf(),
        ..ImportConfig::default()
    }
}

pub async fn people_names(pool: &Pool<Sqlite>) -> Vec<String> {
    sqlx::query_scalar("SELECT first_name FROM people ORDER BY person_id")
        .fetch_all(pool)
        .await
        .expect("people")
}
