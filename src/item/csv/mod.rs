//! Reading delimited text files.
//!
//! [`csv_reader::CsvItemReader`] streams the lines of a file (or of any
//! [`std::io::Read`]) and deserializes each of them into an item with serde.
//! Every line is checked against the configured field names, so a line with
//! too few or too many fields is reported as a malformed record and can be
//! skipped by the step.
//!
//! # Example
//!
//! ```
//! use batch_import::item::csv::csv_reader::CsvItemReaderBuilder;
//! use batch_import::core::item::ItemReader;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize, PartialEq)]
//! #[serde(rename_all = "camelCase")]
//! struct Person {
//!     first_name: String,
//!     last_name: String,
//! }
//!
//! let data = "Jill,Doe\nJoe,Doe\n";
//!
//! let reader = CsvItemReaderBuilder::new()
//!     .names(&["firstName", "lastName"])
//!     .from_reader(data.as_bytes());
//!
//! let mut people: Vec<Person> = Vec::new();
//! while let Some(person) = reader.read().unwrap() {
//!     people.push(person);
//! }
//!
//! assert_eq!(people.len(), 2);
//! assert_eq!(people[1].first_name, "Joe");
//! ```

/// Line-by-line CSV reader.
pub mod csv_reader;

pub use csv_reader::{CsvItemReader, CsvItemReaderBuilder};
