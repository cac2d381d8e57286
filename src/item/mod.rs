#[cfg(feature = "csv")]
/// Item reader for delimited text files.
pub mod csv;

#[cfg(feature = "rdbc")]
/// Item writers for relational databases.
pub mod rdbc;
