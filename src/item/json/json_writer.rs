use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};
use serde::Serialize;

use crate::{
    core::item::{ItemWriter, ItemWriterResult},
    BatchError,
};

type Opener<W> = Box<dyn Fn() -> io::Result<W>>;

/// Cuts the stream back to the given length and moves its cursor there.
type Truncate<W> = fn(&mut W, u64) -> io::Result<()>;

fn truncate_file(file: &mut File, len: u64) -> io::Result<()> {
    file.set_len(len)?;
    file.seek(SeekFrom::Start(len)).map(|_| ())
}

/// Writes items as the elements of one JSON array.
///
/// Each chunk is serialized into a staging buffer by `write`. The buffer
/// reaches the underlying stream only on `flush`, which is the commit of
/// the chunk, and `rollback` discards it. The array is opened by `open`
/// and closed by `close`.
///
/// A `flush` that fails may leave part of the chunk in the stream. A file
/// writer cuts it back to the last committed byte on `rollback`, so the
/// chunk can be retried. A writer built on any other stream cannot rewind:
/// it stays poisoned and every later `write`, `flush` or `close` fails
/// rather than append to a corrupt array.
///
/// A writer built with [`JsonItemWriterBuilder::from_path`] creates (or
/// truncates) its file on `open`, not before.
pub struct JsonItemWriter<W: Write> {
    stream: RefCell<Option<W>>,
    opener: Option<Opener<W>>,
    use_pretty_formatter: bool,
    staged: RefCell<Vec<u8>>,
    /// Items written to the stream
    committed: Cell<usize>,
    /// Items in the staging buffer
    pending: Cell<usize>,
    /// Bytes of the stream holding committed content
    written: Cell<u64>,
    /// The stream holds bytes past `written`
    poisoned: Cell<bool>,
    truncate: Option<Truncate<W>>,
}

fn write_error(error: impl ToString) -> BatchError {
    BatchError::ItemWriter(error.to_string())
}

impl<W: Write> JsonItemWriter<W> {
    fn with_stream<F>(&self, action: F) -> ItemWriterResult
    where
        F: FnOnce(&mut W) -> io::Result<()>,
    {
        let mut stream = self.stream.borrow_mut();
        let stream = stream
            .as_mut()
            .ok_or_else(|| BatchError::ItemWriter("JSON writer is not opened".to_string()))?;
        action(stream).map_err(write_error)
    }

    fn check_not_poisoned(&self) -> ItemWriterResult {
        if self.poisoned.get() {
            return Err(BatchError::ItemWriter(
                "JSON stream holds a partially written chunk".to_string(),
            ));
        }
        Ok(())
    }

    /// Writes `bytes` as committed content. A failure poisons the writer.
    fn append(&self, bytes: &[u8]) -> ItemWriterResult {
        let result = self.with_stream(|stream| {
            stream.write_all(bytes)?;
            stream.flush()
        });

        match result {
            Ok(()) => {
                self.written.set(self.written.get() + bytes.len() as u64);
                Ok(())
            }
            Err(error) => {
                self.poisoned.set(true);
                Err(error)
            }
        }
    }

    fn separator(&self) -> &'static [u8] {
        if self.use_pretty_formatter {
            b",\n"
        } else {
            b","
        }
    }

    /// Returns the underlying stream.
    pub fn into_inner(self) -> Option<W> {
        self.stream.into_inner()
    }
}

impl<O: Serialize, W: Write> ItemWriter<O> for JsonItemWriter<W> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        self.check_not_poisoned()?;
        let mut staged = self.staged.borrow_mut();

        for item in items {
            if self.committed.get() + self.pending.get() > 0 {
                staged.extend_from_slice(self.separator());
            }

            let result = if self.use_pretty_formatter {
                serde_json::to_writer_pretty(&mut *staged, item)
            } else {
                serde_json::to_writer(&mut *staged, item)
            };
            result.map_err(write_error)?;

            self.pending.set(self.pending.get() + 1);
        }

        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        self.check_not_poisoned()?;
        let mut staged = self.staged.borrow_mut();
        self.append(&staged)?;

        debug!("{} JSON items committed", self.pending.get());
        staged.clear();
        self.committed.set(self.committed.get() + self.pending.get());
        self.pending.set(0);
        Ok(())
    }

    fn rollback(&self) -> ItemWriterResult {
        self.staged.borrow_mut().clear();
        self.pending.set(0);

        if !self.poisoned.get() {
            return Ok(());
        }
        let Some(truncate) = self.truncate else {
            warn!("JSON stream cannot be rewound, the writer stays unusable");
            return Ok(());
        };

        let len = self.written.get();
        self.with_stream(|stream| truncate(stream, len))?;
        debug!("JSON stream cut back to {} bytes", len);
        self.poisoned.set(false);
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        if let Some(opener) = &self.opener {
            let stream = opener().map_err(write_error)?;
            *self.stream.borrow_mut() = Some(stream);
        }

        self.staged.borrow_mut().clear();
        self.committed.set(0);
        self.pending.set(0);
        self.written.set(0);
        self.poisoned.set(false);

        let start: &[u8] = if self.use_pretty_formatter { b"[\n" } else { b"[" };
        self.append(start)
    }

    fn close(&self) -> ItemWriterResult {
        self.check_not_poisoned()?;
        let end: &[u8] = if self.use_pretty_formatter { b"\n]\n" } else { b"]\n" };
        self.append(end)
    }
}

#[derive(Default)]
pub struct JsonItemWriterBuilder {
    pretty_formatter: bool,
}

impl JsonItemWriterBuilder {
    pub fn new() -> JsonItemWriterBuilder {
        JsonItemWriterBuilder {
            pretty_formatter: false,
        }
    }

    pub fn pretty_formatter(mut self, yes: bool) -> JsonItemWriterBuilder {
        self.pretty_formatter = yes;
        self
    }

    /// Writes to a file created on `open`.
    ///
    /// Chunks are staged in memory and reach the file in one write each, so
    /// the file is not buffered.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> JsonItemWriter<File> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let opener: Opener<File> = Box::new(move || {
            debug!("Creating JSON file {}", path.display());
            File::create(&path)
        });
        self.build(None, Some(opener), Some(truncate_file))
    }

    /// Writes to `wtr`, which cannot be rewound after a failed commit.
    pub fn from_writer<W: Write>(self, wtr: W) -> JsonItemWriter<W> {
        self.build(Some(wtr), None, None)
    }

    fn build<W: Write>(
        self,
        stream: Option<W>,
        opener: Option<Opener<W>>,
        truncate: Option<Truncate<W>>,
    ) -> JsonItemWriter<W> {
        JsonItemWriter {
            stream: RefCell::new(stream),
            opener,
            use_pretty_formatter: self.pretty_formatter,
            staged: RefCell::new(Vec::new()),
            committed: Cell::new(0),
            pending: Cell::new(0),
            written: Cell::new(0),
            poisoned: Cell::new(false),
            truncate,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{error::Error, fs, io::Cursor};

    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    use super::*;
    use crate::{
        core::{
            job::{Job, JobBuilder},
            repository::{BatchStatus, InMemoryJobRepository},
            step::StepBuilder,
        },
        item::json::JsonItemReaderBuilder,
    };

    #[derive(Serialize)]
    struct City {
        name: &'static str,
        lat: f32,
    }

    fn zagreb() -> City {
        City { name: "Zagreb", lat: 45.5 }
    }

    fn split() -> City {
        City { name: "Split", lat: 43.5 }
    }

    #[test]
    fn committed_chunks_should_form_one_array() -> Result<(), Box<dyn Error>> {
        let writer = JsonItemWriterBuilder::new().from_writer(Vec::new());

        ItemWriter::<City>::open(&writer)?;
        writer.write(&[zagreb()])?;
        ItemWriter::<City>::flush(&writer)?;
        writer.write(&[split()])?;
        ItemWriter::<City>::flush(&writer)?;
        ItemWriter::<City>::close(&writer)?;

        let output = String::from_utf8(writer.into_inner().unwrap())?;
        assert_eq!(
            output,
            "[{\"name\":\"Zagreb\",\"lat\":45.5},{\"name\":\"Split\",\"lat\":43.5}]\n"
        );
        Ok(())
    }

    #[test]
    fn rolled_back_chunk_should_not_be_written() -> Result<(), Box<dyn Error>> {
        let writer = JsonItemWriterBuilder::new().from_writer(Vec::new());

        ItemWriter::<City>::open(&writer)?;
        writer.write(&[zagreb()])?;
        ItemWriter::<City>::rollback(&writer)?;
        writer.write(&[zagreb(), split()])?;
        ItemWriter::<City>::flush(&writer)?;
        ItemWriter::<City>::close(&writer)?;

        let output = String::from_utf8(writer.into_inner().unwrap())?;
        let values: Vec<serde_json::Value> = serde_json::from_str(&output)?;
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["name"], "Zagreb");
        Ok(())
    }

    #[test]
    fn uncommitted_items_should_stay_out_of_the_stream() -> Result<(), Box<dyn Error>> {
        let writer = JsonItemWriterBuilder::new().from_writer(Vec::new());

        ItemWriter::<City>::open(&writer)?;
        writer.write(&[zagreb()])?;

        assert_eq!(writer.stream.borrow().as_deref(), Some(&b"["[..]));
        Ok(())
    }

    #[test]
    fn pretty_output_should_be_valid_json() -> Result<(), Box<dyn Error>> {
        let writer = JsonItemWriterBuilder::new()
            .pretty_formatter(true)
            .from_writer(Vec::new());

        ItemWriter::<City>::open(&writer)?;
        writer.write(&[zagreb(), split()])?;
        ItemWriter::<City>::flush(&writer)?;
        ItemWriter::<City>::close(&writer)?;

        let output = String::from_utf8(writer.into_inner().unwrap())?;
        assert!(output.starts_with("[\n{\n  \"name\": \"Zagreb\""));
        let values: Vec<serde_json::Value> = serde_json::from_str(&output)?;
        assert_eq!(values.len(), 2);
        Ok(())
    }

    #[test]
    fn file_should_be_created_on_open() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("countries.json");
        fs::write(&path, "previous content")?;

        let writer = JsonItemWriterBuilder::new().from_path(&path);
        assert_eq!(fs::read_to_string(&path)?, "previous content");

        ItemWriter::<City>::open(&writer)?;
        ItemWriter::<City>::close(&writer)?;

        assert_eq!(fs::read_to_string(&path)?, "[]\n");
        Ok(())
    }

    /// Accepts bytes until `fail_at` of them are stored, then fails once.
    struct FlakyStream {
        data: Vec<u8>,
        fail_at: Option<usize>,
    }

    impl FlakyStream {
        fn new() -> Self {
            Self {
                data: Vec::new(),
                fail_at: None,
            }
        }
    }

    impl Write for FlakyStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.fail_at {
                Some(limit) if self.data.len() >= limit => {
                    self.fail_at = None;
                    Err(io::Error::other("disk full"))
                }
                Some(limit) => {
                    let accepted = buf.len().min(limit - self.data.len());
                    self.data.extend_from_slice(&buf[..accepted]);
                    Ok(accepted)
                }
                None => {
                    self.data.extend_from_slice(buf);
                    Ok(buf.len())
                }
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn rewind(stream: &mut FlakyStream, len: u64) -> io::Result<()> {
        stream.data.truncate(len as usize);
        Ok(())
    }

    fn fail_after(writer: &JsonItemWriter<FlakyStream>, bytes: usize) {
        let mut stream = writer.stream.borrow_mut();
        let stream = stream.as_mut().unwrap();
        stream.fail_at = Some(stream.data.len() + bytes);
    }

    #[test]
    fn partial_commit_should_be_cut_back_on_rollback() -> Result<(), Box<dyn Error>> {
        let writer = JsonItemWriterBuilder::new().build(Some(FlakyStream::new()), None, Some(rewind));

        ItemWriter::<City>::open(&writer)?;
        writer.write(&[zagreb()])?;
        ItemWriter::<City>::flush(&writer)?;

        writer.write(&[split()])?;
        fail_after(&writer, 7);
        assert!(ItemWriter::<City>::flush(&writer).is_err());
        ItemWriter::<City>::rollback(&writer)?;

        writer.write(&[split()])?;
        ItemWriter::<City>::flush(&writer)?;
        ItemWriter::<City>::close(&writer)?;

        let output = String::from_utf8(writer.into_inner().unwrap().data)?;
        assert_eq!(
            output,
            "[{\"name\":\"Zagreb\",\"lat\":45.5},{\"name\":\"Split\",\"lat\":43.5}]\n"
        );
        Ok(())
    }

    #[test]
    fn partial_commit_on_unrewindable_stream_should_poison_the_writer() -> Result<(), Box<dyn Error>> {
        let writer = JsonItemWriterBuilder::new().build(Some(FlakyStream::new()), None, None);

        ItemWriter::<City>::open(&writer)?;
        writer.write(&[zagreb()])?;
        fail_after(&writer, 5);
        assert!(ItemWriter::<City>::flush(&writer).is_err());
        ItemWriter::<City>::rollback(&writer)?;

        assert!(writer.write(&[zagreb()]).is_err());
        assert!(ItemWriter::<City>::flush(&writer).is_err());
        assert!(ItemWriter::<City>::close(&writer).is_err());

        let output = writer.into_inner().unwrap().data;
        assert_eq!(output, b"[{\"nam");
        Ok(())
    }

    #[derive(Serialize, Deserialize, Clone)]
    struct Name {
        name: String,
    }

    #[test]
    fn retried_chunk_should_leave_valid_json_after_a_partial_commit() -> Result<(), Box<dyn Error>> {
        let reader = JsonItemReaderBuilder::<Name>::new()
            .from_reader(Cursor::new(r#"[{"name":"a"},{"name":"b"},{"name":"c"}]"#));
        let stream = FlakyStream {
            data: Vec::new(),
            fail_at: Some(12),
        };
        let writer = JsonItemWriterBuilder::new().build(Some(stream), None, Some(rewind));

        let repository = InMemoryJobRepository::new();
        let execution = {
            let step = StepBuilder::new("json-to-flaky")
                .chunk::<Name, Name>(2)
                .reader(&reader)
                .writer(&writer)
                .pass_through()
                .retry_limit(2)
                .build()?;
            let job = JobBuilder::new()
                .repository(&repository)
                .start(&step)
                .build()?;
            job.run(false)?
        };

        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.step_executions[0].write_count, 3);

        let output = String::from_utf8(writer.into_inner().unwrap().data)?;
        assert_eq!(output, "[{\"name\":\"a\"},{\"name\":\"b\"},{\"name\":\"c\"}]\n");
        Ok(())
    }

    #[test]
    fn file_writer_should_cut_a_partial_commit_back_on_rollback() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("cities.json");
        let writer = JsonItemWriterBuilder::new().from_path(&path);

        ItemWriter::<City>::open(&writer)?;
        writer.write(&[zagreb()])?;
        ItemWriter::<City>::flush(&writer)?;

        // Bytes of a commit that failed halfway
        writer
            .stream
            .borrow_mut()
            .as_mut()
            .unwrap()
            .write_all(b",{\"name\":\"Spl")?;
        writer.poisoned.set(true);
        ItemWriter::<City>::rollback(&writer)?;

        writer.write(&[split()])?;
        ItemWriter::<City>::flush(&writer)?;
        ItemWriter::<City>::close(&writer)?;

        let values: Vec<serde_json::Value> = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["name"], "Split");
        Ok(())
    }

    #[test]
    fn writing_before_open_should_fail_on_commit() {
        let writer = JsonItemWriterBuilder::new().from_path("/nonexistent/dir/out.json");

        assert!(ItemWriter::<City>::open(&writer).is_err());
        assert!(ItemWriter::<City>::flush(&writer).is_err());
    }
}
