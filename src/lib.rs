#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Batch import

 A small batch engine for scheduled, chunked and restartable imports of
 delimited files into a relational database, with the people import as its
 application.

 ## Core Concepts

- **Job:** a named chain of `Step`s. Running a job for a set of `JobParameters`
  creates a `JobExecution` of the matching `JobInstance`.
- **Step:** reads items one by one, processes them and writes them in chunks.
  Each chunk is committed in its own transaction.
- **ItemReader / ItemProcessor / ItemWriter:** the three stages of a step.
- **JobRepository:** stores instances and executions, and refuses to start an
  instance that is already running or already complete.
- **JobLauncher:** validates parameters, asks the repository for a new
  execution and runs the job.
- **JobScheduler:** fires a launch on a cron expression or at a fixed rate.
- **JobHealthIndicator:** `UP` when the last run completed, `DOWN` otherwise.

 ## Features

| **Feature**   | **Description**                                              |
|---------------|--------------------------------------------------------------|
| csv           | Enables the CSV `ItemReader`                                 |
| rdbc-sqlite   | Enables the SQLite `ItemWriter` and `JobRepository`          |
| full          | Enables all available features and the people import        |

 ## Example

```rust,no_run,compile_fail
let reader = CsvItemReaderBuilder::new()
    .names(&["firstName", "lastName"])
    .from_path("data/sample-data.csv");

let writer = SqliteItemWriterBuilder::<Person>::new()
    .pool(&pool)
    .sql("INSERT INTO people (first_name, last_name) VALUES (:firstName, :lastName)")
    .build()?;

let step = StepBuilder::new("step1")
    .chunk::<Person, Person>(10)
    .reader(&reader)
    .processor(&PersonItemProcessor)
    .writer(&writer)
    .build()?;

let job = JobBuilder::new()
    .name("importUserJob")
    .start(&step)
    .listener(&health)
    .build();

let launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));
let execution = launcher.run(&job, date_parameters())?;

assert_eq!(execution.status, BatchStatus::Completed);
assert!(health.health().is_up());
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of item readers and writers
pub mod item;

/// Application settings
pub mod config;

#[cfg(all(feature = "csv", feature = "rdbc-sqlite"))]
/// The people import job
pub mod people;
