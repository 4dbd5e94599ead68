use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    repository::{BatchStatus, JobRepository, RunClaim},
    step::{Step, StepContext, StepExecution, StepStatus},
};

/// Type alias for job execution results.
///
/// A `JobResult` is a `Result` that contains either:
/// - A `JobExecution`, completed or failed, once the run could be claimed
/// - A `BatchError` when the run could not even start (repository
///   unavailable, run claimed by another process)
type JobResult<T> = Result<T, BatchError>;

/// Represents a job that can be executed.
///
/// A job is an ordered sequence of steps. Steps run strictly one after the
/// other: a step starts only once the previous one completed, and the first
/// failing step stops the job.
pub trait Job {
    /// Runs the job.
    ///
    /// With `resume` set and an incomplete previous run of the same job in
    /// the repository, that run is resumed: its completed steps are kept as
    /// they are and execution restarts at the beginning of its first
    /// non-completed step. Otherwise a new run is started.
    fn run(&self, resume: bool) -> JobResult<JobExecution>;
}

/// Represents the execution of a job.
#[derive(Debug)]
pub struct JobExecution {
    pub job_name: String,
    /// Identifier of the run, increasing per job name
    pub run_id: i64,
    /// Overall status of the run
    pub status: BatchStatus,
    /// Step executions in job order, up to the last step that ran
    pub step_executions: Vec<StepExecution>,
    /// The time when the job started executing
    pub start: Instant,
    /// The time when the job finished executing
    pub end: Instant,
    /// The total duration of the job execution
    pub duration: Duration,
}

impl JobExecution {
    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    /// The step that failed the job, if any.
    pub fn first_failure(&self) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .find(|step_execution| step_execution.status == StepStatus::Failed)
    }
}

/// Represents an instance of a job.
///
/// A job instance is created through the `JobBuilder` and executed by calling
/// the `run` method. The steps are executed in the order they were added.
pub struct JobInstance<'a> {
    /// Unique identifier for this job instance, used as owner of its runs
    id: Uuid,
    /// Name of the job, key of its runs in the repository
    name: String,
    /// Collection of steps that make up this job, in execution order
    steps: Vec<&'a dyn Step>,
    repository: &'a dyn JobRepository,
    cancellation: CancellationToken,
}

impl JobInstance<'_> {
    fn claim(&self, resume: bool) -> JobResult<(RunClaim<'_>, Vec<StepExecution>)> {
        let owner = self.id.to_string();

        if resume {
            if let Some(run_id) = self.repository.find_resumable_run(&self.name)? {
                let claim = RunClaim::acquire(self.repository, &self.name, run_id, &owner)?;
                let previous = self.repository.find_step_executions(&self.name, run_id)?;
                info!("Resuming job: {}, run: {}", self.name, run_id);
                return Ok((claim, previous));
            }
            info!("No run of job {} to resume, starting a new one", self.name);
        }

        let claim = RunClaim::create(self.repository, &self.name, &owner)?;
        Ok((claim, Vec::new()))
    }
}

impl Job for JobInstance<'_> {
    fn run(&self, resume: bool) -> JobResult<JobExecution> {
        let start = Instant::now();

        let (claim, previous) = self.claim(resume)?;
        let run_id = claim.run_id();

        info!("Start of job: {}, run: {}, id: {}", self.name, run_id, self.id);

        let mut status = BatchStatus::Completed;
        let mut step_executions = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let completed = previous.iter().find(|step_execution| {
                step_execution.name == step.get_name()
                    && step_execution.status == StepStatus::Completed
            });

            if let Some(completed) = completed {
                info!(
                    "Step {} already completed in run {}, skipping",
                    completed.name, run_id
                );
                step_executions.push(completed.clone());
                continue;
            }

            let context = StepContext::new(&self.name, run_id, self.repository, &self.cancellation);
            let mut step_execution = StepExecution::new(step.get_name());
            let result = step.execute(&mut step_execution, &context);
            step_executions.push(step_execution);

            if let Err(error) = result {
                error!("Job {} halted at step {}: {}", self.name, step.get_name(), error);
                status = BatchStatus::Failed;
                break;
            }
        }

        if let Err(error) = self.repository.update_job_status(&self.name, run_id, status) {
            warn!("Unable to record status of run {}: {}", run_id, error);
            status = BatchStatus::Failed;
        }

        info!("End of job: {}, run: {}, status: {}", self.name, run_id, status);

        Ok(JobExecution {
            job_name: self.name.clone(),
            run_id,
            status,
            step_executions,
            start,
            end: Instant::now(),
            duration: start.elapsed(),
        })
    }
}

/// Builder for creating a job instance.
///
/// # Example
///
/// ```rust,ignore
/// use geo_batch::core::job::JobBuilder;
///
/// let job = JobBuilder::new()
///     .name("job1".to_string())
///     .repository(&repository)
///     .start(&countries_to_db)
///     .next(&cities_to_db)
///     .build()?;
/// ```
#[derive(Default)]
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    /// Collection of steps to be executed, in order
    steps: Vec<&'a dyn Step>,
    repository: Option<&'a dyn JobRepository>,
    cancellation: Option<CancellationToken>,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self {
            name: None,
            steps: Vec::new(),
            repository: None,
            cancellation: None,
        }
    }

    pub fn name(mut self, name: String) -> JobBuilder<'a> {
        self.name = Some(name);
        self
    }

    /// Repository recording the executions of the job.
    pub fn repository(mut self, repository: &'a dyn JobRepository) -> JobBuilder<'a> {
        self.repository = Some(repository);
        self
    }

    /// Token observed by the steps at every chunk boundary.
    pub fn cancellation_token(mut self, token: CancellationToken) -> JobBuilder<'a> {
        self.cancellation = Some(token);
        self
    }

    /// Sets the first step of the job.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Adds a step to the job, executed after the previously added ones.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Result<JobInstance<'a>, BatchError> {
        let repository = self.repository.ok_or_else(|| {
            BatchError::Configuration("a job repository is required to build a job".to_string())
        })?;

        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.get_name()) {
                return Err(BatchError::Configuration(format!(
                    "step name {} is used twice",
                    step.get_name()
                )));
            }
        }

        Ok(JobInstance {
            id: Uuid::new_v4(),
            name: self.name.unwrap_or_else(build_name),
            steps: self.steps,
            repository,
            cancellation: self.cancellation.unwrap_or_default(),
        })
    }
}
