use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};
use log::debug;
use serde::de::DeserializeOwned;
use std::{
    cell::RefCell,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use crate::{
    core::item::{ItemReader, ItemReaderResult},
    error::BatchError,
};

/// Parsing options shared by every source of a [`CsvItemReader`].
#[derive(Debug, Clone)]
struct CsvOptions {
    delimiter: u8,
    has_headers: bool,
    comment: Option<u8>,
    lines_to_skip: usize,
    names: Vec<String>,
}

impl CsvOptions {
    fn records<R: Read>(&self, rdr: R) -> Result<Records<R>, BatchError> {
        let mut rdr = ReaderBuilder::new()
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .comment(self.comment)
            .has_headers(self.has_headers)
            // Field counts are checked per line to report malformed records
            .flexible(true)
            .from_reader(rdr);

        let headers = if !self.names.is_empty() {
            Some(StringRecord::from(self.names.clone()))
        } else if self.has_headers {
            Some(
                rdr.headers()
                    .map_err(|e| BatchError::Resource(e.to_string()))?
                    .clone(),
            )
        } else {
            None
        };

        Ok(Records {
            records: rdr.into_records(),
            headers,
            to_skip: self.lines_to_skip,
        })
    }
}

struct Records<R> {
    records: StringRecordsIntoIter<R>,
    headers: Option<StringRecord>,
    to_skip: usize,
}

enum Source<R> {
    /// Produces a fresh input every time the reader is opened
    Opener(Box<dyn Fn() -> Result<R, BatchError>>),
    /// Input that can be read only once
    Reader(Option<R>),
}

/// A reader turning the lines of a delimited text source into typed items.
///
/// Fields are bound by name to the item type: the names come from
/// [`CsvItemReaderBuilder::names`] or from the header row. Without either,
/// fields are bound in declaration order.
///
/// A path-backed reader opens its file in [`ItemReader::open`] and releases it
/// in [`ItemReader::close`]; it can be opened again for another step. Reading a
/// reader that was not opened opens it first.
pub struct CsvItemReader<R> {
    options: CsvOptions,
    source: RefCell<Source<R>>,
    records: RefCell<Option<Records<R>>>,
}

impl<R: Read> CsvItemReader<R> {
    fn open_records(&self) -> Result<Records<R>, BatchError> {
        match &mut *self.source.borrow_mut() {
            Source::Opener(open) => self.options.records((*open)()?),
            Source::Reader(rdr) => match rdr.take() {
                Some(rdr) => self.options.records(rdr),
                None => Err(BatchError::Resource(
                    "the input of this reader has already been consumed".to_string(),
                )),
            },
        }
    }

    fn check_field_count(&self, record: &StringRecord, line: u64) -> Result<(), BatchError> {
        let expected = match self.records.borrow().as_ref().and_then(|r| r.headers.as_ref()) {
            Some(headers) => headers.len(),
            None => return Ok(()),
        };

        if record.len() != expected {
            return Err(BatchError::MalformedRecord {
                line,
                expected,
                found: record.len(),
            });
        }
        Ok(())
    }
}

impl<R: Read, T: DeserializeOwned> ItemReader<T> for CsvItemReader<R> {
    fn read(&self) -> ItemReaderResult<T> {
        if self.records.borrow().is_none() {
            ItemReader::<T>::open(self)?;
        }

        loop {
            let mut guard = self.records.borrow_mut();
            let Some(records) = guard.as_mut() else {
                return Ok(None);
            };

            let record = match records.records.next() {
                None => return Ok(None),
                Some(Ok(record)) => record,
                Some(Err(error)) => {
                    return Err(match error.kind() {
                        csv::ErrorKind::Io(_) => BatchError::Resource(error.to_string()),
                        _ => BatchError::ItemReader(error.to_string()),
                    });
                }
            };

            if records.to_skip > 0 {
                records.to_skip -= 1;
                continue;
            }

            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let headers = records.headers.clone();
            drop(guard);

            self.check_field_count(&record, line)?;

            return record
                .deserialize(headers.as_ref())
                .map(Some)
                .map_err(|e| BatchError::ItemReader(format!("line {}: {}", line, e)));
        }
    }

    fn open(&self) -> Result<(), BatchError> {
        if self.records.borrow().is_some() {
            return Ok(());
        }
        let records = self.open_records()?;
        *self.records.borrow_mut() = Some(records);
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        self.records.borrow_mut().take();
        Ok(())
    }
}

/// Builder for [`CsvItemReader`].
///
/// # Example
///
/// ```rust,no_run,compile_fail
/// let reader = CsvItemReaderBuilder::new()
///     .names(&["firstName", "lastName"])
///     .from_path("data/sample-data.csv");
/// ```
#[derive(Debug, Clone)]
pub struct CsvItemReaderBuilder {
    options: CsvOptions,
}

impl Default for CsvItemReaderBuilder {
    fn default() -> Self {
        Self {
            options: CsvOptions {
                delimiter: b',',
                has_headers: false,
                comment: None,
                lines_to_skip: 0,
                names: Vec::new(),
            },
        }
    }
}

impl CsvItemReaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.options.delimiter = delimiter;
        self
    }

    /// Whether the first line holds column names. Defaults to false.
    pub fn has_headers(mut self, yes: bool) -> Self {
        self.options.has_headers = yes;
        self
    }

    /// Lines starting with this byte are ignored.
    pub fn comment(mut self, comment: Option<u8>) -> Self {
        self.options.comment = comment;
        self
    }

    /// Number of lines dropped at the start of the input, after the header row.
    pub fn lines_to_skip(mut self, lines_to_skip: usize) -> Self {
        self.options.lines_to_skip = lines_to_skip;
        self
    }

    /// Names of the fields of a line, in order. They take precedence over the
    /// header row and fix the number of fields expected on every line.
    pub fn names(mut self, names: &[&str]) -> Self {
        self.options.names = names.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn from_reader<R: Read>(self, rdr: R) -> CsvItemReader<R> {
        CsvItemReader {
            options: self.options,
            source: RefCell::new(Source::Reader(Some(rdr))),
            records: RefCell::new(None),
        }
    }

    /// Reader over a file, opened when the step starts.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> CsvItemReader<File> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let open = move || -> Result<File, BatchError> {
            let file = File::open(&path).map_err(|e| {
                BatchError::Resource(format!("unable to open {}: {}", path.display(), e))
            })?;
            debug!("Opened {}", path.display());
            Ok(file)
        };

        CsvItemReader {
            options: self.options,
            source: RefCell::new(Source::Opener(Box::new(open))),
            records: RefCell::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde::Deserialize;
    use tempfile::NamedTempFile;

    use crate::{core::item::ItemReader, error::BatchError};

    use super::CsvItemReaderBuilder;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Person {
        first_name: String,
        last_name: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct City {
        city: String,
        pop: u32,
    }

    fn person(first_name: &str, last_name: &str) -> Person {
        Person {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        }
    }

    fn read_all<T>(reader: &dyn ItemReader<T>) -> Vec<Result<T, BatchError>> {
        let mut items = Vec::new();
        loop {
            match reader.read() {
                Ok(Some(item)) => items.push(Ok(item)),
                Ok(None) => return items,
                Err(err) => items.push(Err(err)),
            }
        }
    }

    #[test]
    fn lines_are_bound_to_names() {
        let data = "Jill,Doe\n\n  Joe , Doe \n";
        let reader = CsvItemReaderBuilder::new()
            .names(&["firstName", "lastName"])
            .from_reader(data.as_bytes());

        let people = read_all::<Person>(&reader);

        assert_eq!(
            people,
            vec![Ok(person("Jill", "Doe")), Ok(person("Joe", "Doe"))]
        );
    }

    #[test]
    fn wrong_field_count_is_a_malformed_record_and_reading_goes_on() {
        let data = "Jill,Doe\nJoe\nJustin,Doe,Jr\nJane,Doe\n";
        let reader = CsvItemReaderBuilder::new()
            .names(&["firstName", "lastName"])
            .from_reader(data.as_bytes());

        let people = read_all::<Person>(&reader);

        assert_eq!(
            people,
            vec![
                Ok(person("Jill", "Doe")),
                Err(BatchError::MalformedRecord {
                    line: 2,
                    expected: 2,
                    found: 1
                }),
                Err(BatchError::MalformedRecord {
                    line: 3,
                    expected: 2,
                    found: 3
                }),
                Ok(person("Jane", "Doe")),
            ]
        );
    }

    #[test]
    fn values_that_do_not_deserialize_are_reader_errors() {
        let data = "city,pop\nBoston,4628910\nConcord,many\n";
        let reader = CsvItemReaderBuilder::new()
            .has_headers(true)
            .from_reader(data.as_bytes());

        let cities = read_all::<City>(&reader);

        assert_eq!(cities.len(), 2);
        assert_eq!(
            cities[0],
            Ok(City {
                city: "Boston".to_string(),
                pop: 4628910
            })
        );
        assert!(matches!(&cities[1], Err(BatchError::ItemReader(message)) if message.contains("line 3")));
    }

    #[test]
    fn comments_and_leading_lines_are_dropped() {
        let data = "exported 2024-01-01\n# people\nJill;Doe\nJoe;Doe\n";
        let reader = CsvItemReaderBuilder::new()
            .delimiter(b';')
            .comment(Some(b'#'))
            .lines_to_skip(1)
            .names(&["firstName", "lastName"])
            .from_reader(data.as_bytes());

        let people = read_all::<Person>(&reader);

        assert_eq!(
            people,
            vec![Ok(person("Jill", "Doe")), Ok(person("Joe", "Doe"))]
        );
    }

    #[test]
    fn path_reader_is_reopened_from_the_start() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Jill,Doe").unwrap();
        writeln!(file, "Joe,Doe").unwrap();

        let reader = CsvItemReaderBuilder::new()
            .names(&["firstName", "lastName"])
            .from_path(file.path());

        ItemReader::<Person>::open(&reader).unwrap();
        let first: Option<Person> = reader.read().unwrap();
        ItemReader::<Person>::close(&reader).unwrap();

        ItemReader::<Person>::open(&reader).unwrap();
        let again: Option<Person> = reader.read().unwrap();

        assert_eq!(first, Some(person("Jill", "Doe")));
        assert_eq!(again, first);
    }

    #[test]
    fn missing_file_is_a_resource_error() {
        let reader = CsvItemReaderBuilder::new()
            .names(&["firstName", "lastName"])
            .from_path("does/not/exist.csv");

        let result = ItemReader::<Person>::open(&reader);

        assert!(matches!(result, Err(BatchError::Resource(_))));
    }

    #[test]
    fn consumed_stream_cannot_be_reopened() {
        let reader = CsvItemReaderBuilder::new()
            .names(&["firstName", "lastName"])
            .from_reader("Jill,Doe\n".as_bytes());

        assert_eq!(read_all::<Person>(&reader).len(), 1);
        ItemReader::<Person>::close(&reader).unwrap();

        assert!(matches!(
            ItemReader::<Person>::open(&reader),
            Err(BatchError::Resource(_))
        ));
    }
}
