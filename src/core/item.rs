use crate::error::BatchError;

/// Result of a single [`ItemReader::read`] call.
///
/// - `Ok(Some(item))`: the next item of the stream
/// - `Ok(None)`: end of stream. Every later call must return `Ok(None)` too.
/// - `Err(BatchError)`: the next item could not be produced
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of a single [`ItemProcessor::process`] call.
///
/// `Ok(None)` is the skip signal: the item is left out of its chunk and
/// counted as skipped without failing the chunk.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Result of the [`ItemWriter`] operations.
pub type ItemWriterResult = Result<(), BatchError>;

/// A lazy, finite source of items.
///
/// A reader is not restartable mid-stream: re-reading from the beginning
/// requires a fresh instance. Implementations must not touch their
/// underlying resource before the first call to `read`, so that a step can
/// consume what an earlier step committed.
pub trait ItemReader<I> {
    /// Reads the next item.
    fn read(&self) -> ItemReaderResult<I>;
}

/// Transforms one item read from the source into the item handed to the sink.
pub trait ItemProcessor<I, O> {
    /// Processes an item, returning `Ok(None)` to skip it.
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Destination of the items of a step, written one chunk at a time.
///
/// The chunk oriented step drives a writer through a transactional
/// boundary per chunk:
///
/// 1. `write` receives the whole chunk and stages it in the underlying store
/// 2. `flush` commits what was staged since the last commit
/// 3. `rollback` discards it when `write` or `flush` failed
///
/// A chunk is therefore either fully committed or not visible at all, and a
/// rolled back chunk can safely be written again.
pub trait ItemWriter<O> {
    /// Stages a chunk of items.
    fn write(&self, items: &[O]) -> ItemWriterResult;

    /// Commits the staged items.
    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Discards the staged items.
    fn rollback(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Called once before the first chunk.
    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Called once after the last chunk, even when the step failed.
    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Processor handing items to the writer unchanged.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<T: Clone> ItemProcessor<T, T> for PassThroughProcessor {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        Ok(Some(item.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::{ItemProcessor, PassThroughProcessor};

    #[test]
    fn pass_through_processor_should_return_a_copy() {
        let processor = PassThroughProcessor;

        let result = processor.process(&"Zagreb".to_string());

        assert_eq!(result.unwrap(), Some("Zagreb".to_string()));
    }
}
