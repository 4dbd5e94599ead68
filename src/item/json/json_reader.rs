use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::{BufRead, BufReader, Read},
    marker::PhantomData,
    path::Path,
};

use log::debug;
use serde::de::DeserializeOwned;

use crate::{
    core::item::{ItemReader, ItemReaderResult},
    BatchError,
};

/// Outcome of scanning the stream for the next element of the array.
enum Scan {
    Element(Vec<u8>),
    EndOfArray,
}

/// A streaming reader of the elements of a JSON array.
///
/// The source is scanned byte by byte, tracking nesting and string
/// literals, so that only one element is held in memory at a time. Each
/// element is then deserialized on its own: a malformed element is
/// reported as `BatchError::ItemReader` and the next call resumes with the
/// following element. A stream that is not a JSON array, a truncated array
/// and an I/O failure are reported as `BatchError::ItemReaderFatal` and end
/// the reader.
pub struct JsonItemReader<R, T> {
    pd: PhantomData<T>,
    reader: RefCell<BufReader<R>>,
    started: Cell<bool>,
    exhausted: Cell<bool>,
    index: Cell<usize>,
}

impl<R: Read, T: DeserializeOwned> JsonItemReader<R, T> {
    fn new(rdr: R, capacity: usize) -> Self {
        Self {
            pd: PhantomData,
            reader: RefCell::new(BufReader::with_capacity(capacity, rdr)),
            started: Cell::new(false),
            exhausted: Cell::new(false),
            index: Cell::new(0),
        }
    }

    fn structure_error(&self, message: String) -> BatchError {
        self.exhausted.set(true);
        BatchError::ItemReaderFatal(message)
    }

    fn scan(&self) -> Result<Scan, BatchError> {
        let mut reader = self.reader.borrow_mut();

        let mut element = Vec::new();
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        loop {
            let buffer = reader
                .fill_buf()
                .map_err(|error| self.structure_error(error.to_string()))?;

            if buffer.is_empty() {
                if !self.started.get() {
                    return Ok(Scan::EndOfArray);
                }
                return Err(self.structure_error(format!(
                    "unexpected end of JSON array after element {}",
                    self.index.get()
                )));
            }

            let mut consumed = 0;
            let mut found = None;

            for &byte in buffer.iter() {
                if !self.started.get() {
                    consumed += 1;
                    match byte {
                        b'[' => self.started.set(true),
                        byte if byte.is_ascii_whitespace() => {}
                        byte => {
                            return Err(self.structure_error(format!(
                                "expected a JSON array, found '{}'",
                                byte as char
                            )));
                        }
                    }
                    continue;
                }

                if element.is_empty() {
                    consumed += 1;
                    match byte {
                        b']' => {
                            found = Some(Scan::EndOfArray);
                            break;
                        }
                        b',' => {}
                        byte if byte.is_ascii_whitespace() => {}
                        byte => {
                            element.push(byte);
                            match byte {
                                b'{' | b'[' => depth = 1,
                                b'"' => in_string = true,
                                _ => {}
                            }
                        }
                    }
                    continue;
                }

                if in_string {
                    consumed += 1;
                    element.push(byte);
                    if escaped {
                        escaped = false;
                    } else if byte == b'\\' {
                        escaped = true;
                    } else if byte == b'"' {
                        in_string = false;
                        if depth == 0 {
                            found = Some(Scan::Element(std::mem::take(&mut element)));
                            break;
                        }
                    }
                    continue;
                }

                match byte {
                    // End of a scalar element, left for the next scan.
                    b',' | b']' if depth == 0 => {
                        found = Some(Scan::Element(std::mem::take(&mut element)));
                        break;
                    }
                    byte if depth == 0 && byte.is_ascii_whitespace() => {
                        found = Some(Scan::Element(std::mem::take(&mut element)));
                        break;
                    }
                    b'"' => in_string = true,
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => depth = depth.saturating_sub(1),
                    _ => {}
                }

                consumed += 1;
                element.push(byte);

                if depth == 0 && matches!(byte, b'}' | b']') {
                    found = Some(Scan::Element(std::mem::take(&mut element)));
                    break;
                }
            }

            reader.consume(consumed);

            if let Some(scan) = found {
                return Ok(scan);
            }
        }
    }
}

impl<R: Read, T: DeserializeOwned> ItemReader<T> for JsonItemReader<R, T> {
    fn read(&self) -> ItemReaderResult<T> {
        if self.exhausted.get() {
            return Ok(None);
        }

        match self.scan()? {
            Scan::EndOfArray => {
                debug!("End of JSON array after {} elements", self.index.get());
                self.exhausted.set(true);
                Ok(None)
            }
            Scan::Element(bytes) => {
                let index = self.index.get();
                self.index.set(index + 1);

                serde_json::from_slice(&bytes).map(Some).map_err(|error| {
                    BatchError::ItemReader(format!("element {}: {}", index, error))
                })
            }
        }
    }
}

#[derive(Default)]
pub struct JsonItemReaderBuilder<T> {
    _pd: PhantomData<T>,
    capacity: Option<usize>,
}

impl<T: DeserializeOwned> JsonItemReaderBuilder<T> {
    pub fn new() -> JsonItemReaderBuilder<T> {
        Self {
            _pd: PhantomData,
            capacity: Some(8 * 1024),
        }
    }

    /// Capacity of the read buffer.
    pub fn capacity(mut self, capacity: usize) -> JsonItemReaderBuilder<T> {
        self.capacity = Some(capacity);
        self
    }

    pub fn from_reader<R: Read>(self, rdr: R) -> JsonItemReader<R, T> {
        JsonItemReader::new(rdr, self.capacity.unwrap_or(8 * 1024))
    }

    /// # Errors
    /// Returns `BatchError::ItemReader` if the file cannot be opened.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<JsonItemReader<File, T>, BatchError> {
        let file = File::open(path.as_ref()).map_err(|error| {
            BatchError::ItemReader(format!(
                "unable to open {}: {}",
                path.as_ref().display(),
                error
            ))
        })?;
        Ok(self.from_reader(file))
    }
}
