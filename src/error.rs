use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    #[error("ItemReader from: {0}")]
    ItemReader(String),

    /// The source itself broke (I/O failure, truncated or malformed stream):
    /// never skipped, whatever the skip limit.
    #[error("ItemReader stream failure from: {0}")]
    ItemReaderFatal(String),

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    #[error("Skip limit exceeded in step {step}: {skip_count} skipped items, limit is {skip_limit}")]
    SkipLimitExceeded {
        step: String,
        skip_count: usize,
        skip_limit: usize,
    },

    #[error("Chunk write failed in step {step} after {attempts} attempt(s): {cause}")]
    RetryExhausted {
        step: String,
        attempts: usize,
        cause: String,
    },

    #[error("JobRepository from: {0}")]
    Repository(String),

    #[error("Step {0} cancelled at chunk boundary")]
    Cancelled(String),

    #[error("Run {run_id} of job {job} is already claimed by another execution")]
    RunAlreadyClaimed { job: String, run_id: i64 },

    #[error("Configuration: {0}")]
    Configuration(String),
}
