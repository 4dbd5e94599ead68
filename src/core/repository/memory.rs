use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use crate::{
    BatchError,
    core::step::{StepExecution, StepStatus},
};

use super::{BatchStatus, JobRepository};

struct RunRecord {
    status: BatchStatus,
    claimed_by: Option<String>,
    steps: Vec<StepExecution>,
}

/// Job repository keeping executions in memory.
///
/// Useful for tests and for jobs that never need to be resumed by another
/// process.
#[derive(Default)]
pub struct InMemoryJobRepository {
    runs: Mutex<BTreeMap<(String, i64), RunRecord>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> Result<MutexGuard<'_, BTreeMap<(String, i64), RunRecord>>, BatchError> {
        self.runs
            .lock()
            .map_err(|error| BatchError::Repository(error.to_string()))
    }
}

fn unknown_run(job_name: &str, run_id: i64) -> BatchError {
    BatchError::Repository(format!("unknown run {} of job {}", run_id, job_name))
}

impl JobRepository for InMemoryJobRepository {
    fn create_run(&self, job_name: &str, owner: &str) -> Result<i64, BatchError> {
        let mut runs = self.runs()?;

        let run_id = runs
            .keys()
            .filter(|(name, _)| name == job_name)
            .map(|(_, run_id)| *run_id)
            .max()
            .unwrap_or(0)
            + 1;

        runs.insert(
            (job_name.to_string(), run_id),
            RunRecord {
                status: BatchStatus::Started,
                claimed_by: Some(owner.to_string()),
                steps: Vec::new(),
            },
        );

        Ok(run_id)
    }

    fn find_resumable_run(&self, job_name: &str) -> Result<Option<i64>, BatchError> {
        let runs = self.runs()?;

        let latest = runs
            .iter()
            .filter(|((name, _), _)| name == job_name)
            .max_by_key(|((_, run_id), _)| *run_id);

        Ok(latest
            .filter(|(_, record)| record.status != BatchStatus::Completed)
            .map(|((_, run_id), _)| *run_id))
    }

    fn claim_run(&self, job_name: &str, run_id: i64, owner: &str) -> Result<(), BatchError> {
        let mut runs = self.runs()?;

        let record = runs
            .get_mut(&(job_name.to_string(), run_id))
            .ok_or_else(|| unknown_run(job_name, run_id))?;

        if matches!(&record.claimed_by, Some(current) if current != owner) {
            return Err(BatchError::RunAlreadyClaimed {
                job: job_name.to_string(),
                run_id,
            });
        }

        record.claimed_by = Some(owner.to_string());
        record.status = BatchStatus::Started;
        Ok(())
    }

    fn release_run(&self, job_name: &str, run_id: i64) -> Result<(), BatchError> {
        let mut runs = self.runs()?;

        let record = runs
            .get_mut(&(job_name.to_string(), run_id))
            .ok_or_else(|| unknown_run(job_name, run_id))?;
        record.claimed_by = None;
        Ok(())
    }

    fn update_job_status(
        &self,
        job_name: &str,
        run_id: i64,
        status: BatchStatus,
    ) -> Result<(), BatchError> {
        let mut runs = self.runs()?;

        let record = runs
            .get_mut(&(job_name.to_string(), run_id))
            .ok_or_else(|| unknown_run(job_name, run_id))?;
        record.status = status;
        Ok(())
    }

    fn find_job_status(
        &self,
        job_name: &str,
        run_id: i64,
    ) -> Result<Option<BatchStatus>, BatchError> {
        let runs = self.runs()?;
        Ok(runs
            .get(&(job_name.to_string(), run_id))
            .map(|record| record.status))
    }

    fn save_step_execution(
        &self,
        job_name: &str,
        run_id: i64,
        step_execution: &StepExecution,
    ) -> Result<(), BatchError> {
        let mut runs = self.runs()?;

        let record = runs
            .get_mut(&(job_name.to_string(), run_id))
            .ok_or_else(|| unknown_run(job_name, run_id))?;

        match record
            .steps
            .iter()
            .position(|step| step.name == step_execution.name)
        {
            Some(index) if record.steps[index].status == StepStatus::Completed => {
                Err(BatchError::Repository(format!(
                    "step {} of run {} of job {} is already completed",
                    step_execution.name, run_id, job_name
                )))
            }
            Some(index) => {
                record.steps[index] = step_execution.clone();
                Ok(())
            }
            None => {
                record.steps.push(step_execution.clone());
                Ok(())
            }
        }
    }

    fn find_step_executions(
        &self,
        job_name: &str,
        run_id: i64,
    ) -> Result<Vec<StepExecution>, BatchError> {
        let runs = self.runs()?;
        Ok(runs
            .get(&(job_name.to_string(), run_id))
            .map(|record| record.steps.clone())
            .unwrap_or_default())
    }
}
