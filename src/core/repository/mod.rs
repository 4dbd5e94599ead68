use std::{fmt, str::FromStr};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::BatchError;

use super::step::StepExecution;

mod memory;
#[cfg(feature = "rdbc-sqlite")]
mod sqlite;

pub use memory::InMemoryJobRepository;
#[cfg(feature = "rdbc-sqlite")]
pub use sqlite::SqliteJobRepository;

/// Overall status of a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// The job is running, or its process died while running it
    Started,
    /// Every step of the job completed
    Completed,
    /// A step of the job failed
    Failed,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            BatchStatus::Started => "STARTED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
        };
        f.write_str(status)
    }
}

impl FromStr for BatchStatus {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(BatchStatus::Started),
            "COMPLETED" => Ok(BatchStatus::Completed),
            "FAILED" => Ok(BatchStatus::Failed),
            other => Err(BatchError::Repository(format!(
                "unknown job status: {}",
                other
            ))),
        }
    }
}

/// Durable store of job and step executions.
///
/// Records are keyed by `(job_name, run_id)` for jobs and
/// `(job_name, run_id, step_name)` for steps. They are only used to resume
/// interrupted jobs and for audit, never for the data of a step.
///
/// A run is written by a single owner at a time: [`claim_run`] must be
/// obtained before anything is saved for it.
///
/// [`claim_run`]: JobRepository::claim_run
pub trait JobRepository {
    /// Mints the next run id of `job_name`, records the run as `Started` and
    /// claims it for `owner`, atomically.
    fn create_run(&self, job_name: &str, owner: &str) -> Result<i64, BatchError>;

    /// Returns the latest run of `job_name` if it did not complete.
    fn find_resumable_run(&self, job_name: &str) -> Result<Option<i64>, BatchError>;

    /// Claims an existing run for `owner`.
    ///
    /// Fails with [`BatchError::RunAlreadyClaimed`] when another owner holds
    /// the run.
    fn claim_run(&self, job_name: &str, run_id: i64, owner: &str) -> Result<(), BatchError>;

    /// Releases the claim on a run, whoever holds it.
    fn release_run(&self, job_name: &str, run_id: i64) -> Result<(), BatchError>;

    fn update_job_status(
        &self,
        job_name: &str,
        run_id: i64,
        status: BatchStatus,
    ) -> Result<(), BatchError>;

    fn find_job_status(
        &self,
        job_name: &str,
        run_id: i64,
    ) -> Result<Option<BatchStatus>, BatchError>;

    /// Inserts or replaces the record of a step execution.
    ///
    /// A `Completed` step record is final: saving over it is an error.
    fn save_step_execution(
        &self,
        job_name: &str,
        run_id: i64,
        step_execution: &StepExecution,
    ) -> Result<(), BatchError>;

    /// Step executions of a run, in the order they were first saved.
    fn find_step_executions(
        &self,
        job_name: &str,
        run_id: i64,
    ) -> Result<Vec<StepExecution>, BatchError>;
}

/// Claim on a run, released when dropped.
pub struct RunClaim<'r> {
    repository: &'r dyn JobRepository,
    job_name: String,
    run_id: i64,
}

impl<'r> RunClaim<'r> {
    /// Creates a new run of `job_name` claimed by `owner`.
    pub fn create(
        repository: &'r dyn JobRepository,
        job_name: &str,
        owner: &str,
    ) -> Result<Self, BatchError> {
        let run_id = repository.create_run(job_name, owner)?;
        debug!("Run {} of job {} created by {}", run_id, job_name, owner);
        Ok(Self {
            repository,
            job_name: job_name.to_string(),
            run_id,
        })
    }

    /// Claims an existing run of `job_name` for `owner`.
    pub fn acquire(
        repository: &'r dyn JobRepository,
        job_name: &str,
        run_id: i64,
        owner: &str,
    ) -> Result<Self, BatchError> {
        repository.claim_run(job_name, run_id, owner)?;
        debug!("Run {} of job {} claimed by {}", run_id, job_name, owner);
        Ok(Self {
            repository,
            job_name: job_name.to_string(),
            run_id,
        })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        match self.repository.release_run(&self.job_name, self.run_id) {
            Ok(()) => debug!("Run {} of job {} released", self.run_id, self.job_name),
            Err(error) => warn!(
                "Unable to release run {} of job {}: {}",
                self.run_id, self.job_name, error
            ),
        }
    }
}
