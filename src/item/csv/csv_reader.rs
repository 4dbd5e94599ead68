use csv::{ReaderBuilder, StringRecord, Terminator, Trim};
use serde::de::DeserializeOwned;
use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::Read,
    path::Path,
};

use crate::{
    core::item::{ItemReader, ItemReaderResult},
    error::BatchError,
};

/// A CSV item reader that implements the `ItemReader` trait.
///
/// This reader deserializes CSV data into Rust structs row by row
/// using Serde's deserialization capabilities. It can process CSV
/// data from files, strings, or any source implementing the `Read` trait.
///
/// # Implementation Details
///
/// - Nothing is read from the source before the first call to `read`
/// - When included fields are configured, every row is projected on them
///   before deserialization, in the configured order
/// - Column names come from `names` when set, otherwise from the header
///   line (projected the same way as the rows)
/// - A malformed row is reported as `BatchError::ItemReader` and the next
///   call moves on to the following row
/// - A failure of the source itself is reported as
///   `BatchError::ItemReaderFatal` and ends the stream
/// - Once the end of the data is reached, every call returns `Ok(None)`
pub struct CsvItemReader<R> {
    reader: RefCell<csv::Reader<R>>,
    has_headers: bool,
    included_fields: Vec<usize>,
    names: Option<StringRecord>,
    exhausted: Cell<bool>,
}

impl<R: Read> CsvItemReader<R> {
    fn project(&self, record: &StringRecord) -> Result<StringRecord, BatchError> {
        if self.included_fields.is_empty() {
            return Ok(record.clone());
        }

        self.included_fields
            .iter()
            .map(|index| {
                record.get(*index).ok_or_else(|| {
                    BatchError::ItemReader(format!(
                        "line {}: no column {} in a row of {} columns",
                        line(record),
                        index,
                        record.len()
                    ))
                })
            })
            .collect()
    }

    fn headers(&self, reader: &mut csv::Reader<R>) -> Result<Option<StringRecord>, BatchError> {
        if let Some(names) = &self.names {
            return Ok(Some(names.clone()));
        }
        if !self.has_headers {
            return Ok(None);
        }

        let headers = reader
            .headers()
            .map_err(|error| self.read_error(error))?
            .clone();
        self.project(&headers).map(Some)
    }
}

impl<R> CsvItemReader<R> {
    fn read_error(&self, error: csv::Error) -> BatchError {
        if error.is_io_error() {
            self.exhausted.set(true);
            return BatchError::ItemReaderFatal(error.to_string());
        }
        BatchError::ItemReader(error.to_string())
    }
}

fn line(record: &StringRecord) -> u64 {
    record.position().map_or(0, |position| position.line())
}

impl<R: Read, T: DeserializeOwned> ItemReader<T> for CsvItemReader<R> {
    /// Reads the next item from the CSV source.
    ///
    /// # Returns
    /// - `Ok(Some(record))` if a record is successfully read
    /// - `Ok(None)` if there are no more records to read
    /// - `Err(BatchError::ItemReader(error))` if the row cannot be parsed or deserialized
    /// - `Err(BatchError::ItemReaderFatal(error))` if the source cannot be read
    fn read(&self) -> ItemReaderResult<T> {
        if self.exhausted.get() {
            return Ok(None);
        }

        let mut reader = self.reader.borrow_mut();
        let mut record = StringRecord::new();

        let has_record = reader
            .read_record(&mut record)
            .map_err(|error| self.read_error(error))?;

        if !has_record {
            self.exhausted.set(true);
            return Ok(None);
        }

        let headers = self.headers(&mut reader)?;
        let projected = self.project(&record)?;

        projected
            .deserialize(headers.as_ref())
            .map(Some)
            .map_err(|error| {
                BatchError::ItemReader(format!("line {}: {}", line(&record), error))
            })
    }
}

/// A builder for configuring CSV item reading.
///
/// # Default Configuration
///
/// - Delimiter: comma (,)
/// - Terminator: CRLF (accepts `\r\n`, `\r` and `\n`)
/// - Headers: disabled
/// - Trimming: All fields trimmed
/// - Included fields: all of them
#[derive(Default)]
pub struct CsvItemReaderBuilder {
    /// The delimiter character (default: comma ',')
    delimiter: u8,
    /// The line terminator (default: CRLF)
    terminator: Terminator,
    /// Whether the CSV has headers (default: false)
    has_headers: bool,
    /// Indexes of the kept columns, in output order
    included_fields: Vec<usize>,
    /// Names given to the kept columns
    names: Option<StringRecord>,
}

impl CsvItemReaderBuilder {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            terminator: Terminator::CRLF,
            has_headers: false,
            included_fields: Vec::new(),
            names: None,
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// Sets whether the first line holds column names.
    ///
    /// The header line is never returned as an item. Its names are used for
    /// deserialization unless [`names`](Self::names) is set.
    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    /// Keeps only the columns at the given zero-based indexes.
    pub fn included_fields(mut self, indexes: &[usize]) -> Self {
        self.included_fields = indexes.to_vec();
        self
    }

    /// Names the columns handed to deserialization, after projection.
    pub fn names(mut self, names: &[&str]) -> Self {
        self.names = Some(StringRecord::from(names.to_vec()));
        self
    }

    fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .has_headers(self.has_headers)
            .flexible(false);
        builder
    }

    /// Creates a `CsvItemReader` from a reader.
    pub fn from_reader<R: Read>(self, rdr: R) -> CsvItemReader<R> {
        let reader = self.reader_builder().from_reader(rdr);
        self.build(reader)
    }

    /// Creates a `CsvItemReader` from a file path.
    ///
    /// # Errors
    /// Returns `BatchError::ItemReader` if the file cannot be opened.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<CsvItemReader<File>, BatchError> {
        let reader = self
            .reader_builder()
            .from_path(path.as_ref())
            .map_err(|error| {
                BatchError::ItemReader(format!(
                    "unable to open {}: {}",
                    path.as_ref().display(),
                    error
                ))
            })?;
        Ok(self.build(reader))
    }

    fn build<R: Read>(self, reader: csv::Reader<R>) -> CsvItemReader<R> {
        CsvItemReader {
            reader: RefCell::new(reader),
            has_headers: self.has_headers,
            included_fields: self.included_fields,
            names: self.names,
            exhausted: Cell::new(false),
        }
    }
}
