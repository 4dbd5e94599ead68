use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    chunk::{Chunk, ChunkStatus},
    item::{ItemProcessor, ItemReader, ItemWriter, PassThroughProcessor},
    repository::JobRepository,
};

/// Status of a step execution.
///
/// `NotStarted -> Started -> {Completed, Failed}`. The two last states are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    NotStarted,
    Started,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            StepStatus::NotStarted => "NOT_STARTED",
            StepStatus::Started => "STARTED",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
        };
        f.write_str(status)
    }
}

impl FromStr for StepStatus {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(StepStatus::NotStarted),
            "STARTED" => Ok(StepStatus::Started),
            "COMPLETED" => Ok(StepStatus::Completed),
            "FAILED" => Ok(StepStatus::Failed),
            other => Err(BatchError::Repository(format!(
                "unknown step status: {}",
                other
            ))),
        }
    }
}

/// One run of a step inside a job execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    /// Unique identifier for this step execution
    pub id: Uuid,
    /// Name of the executed step
    pub name: String,
    /// Current status of the step execution
    pub status: StepStatus,
    /// Number of items pulled from the reader, skipped ones included
    pub read_count: usize,
    /// Number of items committed by the writer
    pub write_count: usize,
    /// Number of items skipped by the reader or the processor
    pub skip_count: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Error that failed the step
    pub failure_cause: Option<String>,
}

impl StepExecution {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: StepStatus::NotStarted,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            start_time: None,
            end_time: None,
            failure_cause: None,
        }
    }

    fn start(&mut self) {
        self.status = StepStatus::Started;
        self.start_time = Some(Utc::now());
    }

    fn complete(&mut self) {
        self.status = StepStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    fn fail(&mut self, error: &BatchError) {
        self.status = StepStatus::Failed;
        self.end_time = Some(Utc::now());
        self.failure_cause = Some(error.to_string());
    }
}

/// What a step needs from the job running it.
pub struct StepContext<'a> {
    pub job_name: &'a str,
    pub run_id: i64,
    repository: &'a dyn JobRepository,
    cancellation: &'a CancellationToken,
}

impl<'a> StepContext<'a> {
    pub fn new(
        job_name: &'a str,
        run_id: i64,
        repository: &'a dyn JobRepository,
        cancellation: &'a CancellationToken,
    ) -> Self {
        Self {
            job_name,
            run_id,
            repository,
            cancellation,
        }
    }

    /// Persists the current state of a step execution.
    pub fn checkpoint(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        self.repository
            .save_step_execution(self.job_name, self.run_id, step_execution)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Represents a step of a job.
pub trait Step {
    /// Name of the step, unique inside its job.
    fn get_name(&self) -> &str;

    /// Executes the step.
    ///
    /// The step updates `step_execution` as it progresses and checkpoints it
    /// through the context. When it returns, the execution is either
    /// `Completed` (`Ok`) or `Failed` with its cause recorded (`Err`).
    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<(), BatchError>;
}

/// Transactional boundary around the write of one chunk.
///
/// Dropping the boundary without a successful commit rolls the writer back,
/// whichever path left the write.
struct ChunkTransaction<'w, O> {
    writer: &'w dyn ItemWriter<O>,
    committed: bool,
}

impl<'w, O> ChunkTransaction<'w, O> {
    fn begin(writer: &'w dyn ItemWriter<O>) -> Self {
        Self {
            writer,
            committed: false,
        }
    }

    fn write(&self, items: &[O]) -> Result<(), BatchError> {
        self.writer.write(items)
    }

    fn commit(mut self) -> Result<(), BatchError> {
        self.writer.flush()?;
        self.committed = true;
        Ok(())
    }
}

impl<O> Drop for ChunkTransaction<'_, O> {
    fn drop(&mut self) {
        if !self.committed {
            debug!("Rolling back chunk");
            if let Err(error) = self.writer.rollback() {
                error!("Rollback failed: {}", error);
            }
        }
    }
}

/// Step reading, processing and writing items chunk by chunk.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    /// Component responsible for reading items from the source
    reader: &'a dyn ItemReader<I>,
    /// Component responsible for processing items
    processor: &'a dyn ItemProcessor<I, O>,
    /// Component responsible for writing items to the destination
    writer: &'a dyn ItemWriter<O>,
    /// Number of items pulled from the reader for each chunk
    chunk_size: usize,
    /// Maximum number of skipped items before failing the step
    skip_limit: usize,
    /// Maximum number of write attempts of a chunk
    retry_limit: usize,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<(), BatchError> {
        step_execution.start();

        info!(
            "Start of step: {}, run: {}, id: {}",
            step_execution.name, context.run_id, step_execution.id
        );

        let result = context
            .checkpoint(step_execution)
            .and_then(|()| self.writer.open())
            .and_then(|()| self.run_chunks(step_execution, context));

        Self::manage_error(self.writer.close());

        let result = result.and_then(|()| {
            step_execution.complete();
            context.checkpoint(step_execution)
        });

        match result {
            Ok(()) => {
                info!(
                    "End of step: {}, read: {}, written: {}, skipped: {}",
                    step_execution.name,
                    step_execution.read_count,
                    step_execution.write_count,
                    step_execution.skip_count
                );
                Ok(())
            }
            Err(error) => {
                error!("Step {} failed: {}", step_execution.name, error);
                step_execution.fail(&error);
                Self::manage_error(context.checkpoint(step_execution));
                Err(error)
            }
        }
    }
}

impl<I, O> ChunkOrientedStep<'_, I, O> {
    fn run_chunks(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<(), BatchError> {
        loop {
            if context.is_cancelled() {
                warn!("Cancellation requested, stopping step {}", self.name);
                return Err(BatchError::Cancelled(self.name.clone()));
            }

            let (chunk, chunk_status) = self.read_chunk(step_execution)?;

            if !chunk.is_empty() {
                self.write_chunk(step_execution, chunk.get_items())?;
            }

            debug!(
                "Chunk done: pulled {}, written {}, total read {}, total written {}, total skipped {}",
                chunk.pulled(),
                chunk.len(),
                step_execution.read_count,
                step_execution.write_count,
                step_execution.skip_count
            );

            context.checkpoint(step_execution)?;

            if chunk_status == ChunkStatus::Finished {
                return Ok(());
            }
        }
    }

    /// Pulls up to `chunk_size` items and processes them.
    ///
    /// # Returns
    /// - `Ok((chunk, ChunkStatus::Full))`: `chunk_size` items were pulled
    /// - `Ok((chunk, ChunkStatus::Finished))`: the reader reached its end
    /// - `Err(BatchError)`: a read or process error that cannot be skipped
    fn read_chunk(
        &self,
        step_execution: &mut StepExecution,
    ) -> Result<(Chunk<O>, ChunkStatus), BatchError> {
        let mut chunk = Chunk::new(self.chunk_size);

        while !chunk.is_full() {
            let item = match self.reader.read() {
                Ok(Some(item)) => item,
                Ok(None) => return Ok((chunk, ChunkStatus::Finished)),
                Err(error @ BatchError::ItemReaderFatal(_)) => return Err(error),
                Err(error) => {
                    chunk.pull();
                    step_execution.read_count += 1;

                    if self.skip_limit == 0 {
                        return Err(error);
                    }
                    warn!(
                        "Skipping item #{} of step {}: {}",
                        step_execution.read_count, self.name, error
                    );
                    self.skip(step_execution)?;
                    continue;
                }
            };

            chunk.pull();
            step_execution.read_count += 1;

            match self.processor.process(&item)? {
                Some(processed) => chunk.add_item(processed),
                None => {
                    debug!(
                        "Item #{} of step {} filtered by processor",
                        step_execution.read_count, self.name
                    );
                    self.skip(step_execution)?;
                }
            }
        }

        Ok((chunk, ChunkStatus::Full))
    }

    fn skip(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        step_execution.skip_count += 1;

        if step_execution.skip_count > self.skip_limit {
            return Err(BatchError::SkipLimitExceeded {
                step: self.name.clone(),
                skip_count: step_execution.skip_count,
                skip_limit: self.skip_limit,
            });
        }
        Ok(())
    }

    /// Writes a chunk inside its own transactional boundary, retrying the
    /// whole chunk up to `retry_limit` attempts.
    fn write_chunk(
        &self,
        step_execution: &mut StepExecution,
        items: &[O],
    ) -> Result<(), BatchError> {
        debug!("Writing chunk of {} items", items.len());

        let mut attempt = 0;
        loop {
            attempt += 1;

            let transaction = ChunkTransaction::begin(self.writer);
            let result = transaction
                .write(items)
                .and_then(|()| transaction.commit());

            match result {
                Ok(()) => {
                    step_execution.write_count += items.len();
                    return Ok(());
                }
                Err(error) => {
                    warn!(
                        "Write attempt {}/{} of step {} failed: {}",
                        attempt, self.retry_limit, self.name, error
                    );

                    if attempt >= self.retry_limit {
                        return Err(BatchError::RetryExhausted {
                            step: self.name.clone(),
                            attempts: attempt,
                            cause: error.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Logs errors of operations that must not hide the outcome of the step.
    fn manage_error(result: Result<(), BatchError>) {
        if let Err(error) = result {
            warn!("Non-fatal error: {}", error);
        }
    }
}

/// Builder of a [`ChunkOrientedStep`].
///
/// ```
/// use geo_batch::core::item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult};
/// use geo_batch::core::step::StepBuilder;
///
/// struct Empty;
/// impl ItemReader<String> for Empty {
///     fn read(&self) -> ItemReaderResult<String> {
///         Ok(None)
///     }
/// }
///
/// struct Discard;
/// impl ItemWriter<String> for Discard {
///     fn write(&self, _items: &[String]) -> ItemWriterResult {
///         Ok(())
///     }
/// }
///
/// let (reader, writer) = (Empty, Discard);
/// let step = StepBuilder::new("noop")
///     .chunk::<String, String>(100)
///     .reader(&reader)
///     .writer(&writer)
///     .pass_through()
///     .skip_limit(5)
///     .retry_limit(3)
///     .build();
///
/// assert!(step.is_ok());
/// ```
pub struct ChunkOrientedStepBuilder<'a, I, O> {
    /// Name of the step
    name: String,
    /// Component responsible for reading items from the source
    reader: Option<&'a dyn ItemReader<I>>,
    /// Component responsible for processing items
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    /// Component responsible for writing items to the destination
    writer: Option<&'a dyn ItemWriter<O>>,
    /// Number of items to process in each chunk
    chunk_size: usize,
    /// Maximum number of skipped items allowed before failing the step
    skip_limit: usize,
    /// Maximum number of write attempts of one chunk
    retry_limit: usize,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            chunk_size: 10,
            skip_limit: 0,
            retry_limit: 1,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        let missing = |component: &str| {
            BatchError::Configuration(format!(
                "{} is required for building step {}",
                component, self.name
            ))
        };

        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "chunk size of step {} must be at least 1",
                self.name
            )));
        }
        if self.retry_limit == 0 {
            return Err(BatchError::Configuration(format!(
                "retry limit of step {} must be at least 1",
                self.name
            )));
        }

        Ok(ChunkOrientedStep {
            reader: self.reader.ok_or_else(|| missing("Reader"))?,
            processor: self.processor.ok_or_else(|| missing("Processor"))?,
            writer: self.writer.ok_or_else(|| missing("Writer"))?,
            name: self.name,
            chunk_size: self.chunk_size,
            skip_limit: self.skip_limit,
            retry_limit: self.retry_limit,
        })
    }
}

impl<'a, T: Clone> ChunkOrientedStepBuilder<'a, T, T> {
    /// Hands read items to the writer unchanged.
    pub fn pass_through(mut self) -> Self {
        self.processor = Some(&PassThroughProcessor);
        self
    }
}

pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    /// Starts building a step. An empty name is replaced by a random one.
    pub fn new(name: &str) -> Self {
        let name = if name.is_empty() {
            build_name()
        } else {
            name.to_string()
        };
        Self { name }
    }

    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}
