use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{Pool, Row, Sqlite, sqlite::SqliteRow};
use uuid::Uuid;

use crate::{
    BatchError,
    core::{block_on, step::StepExecution},
};

use super::{BatchStatus, JobRepository};

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS batch_job_execution (
        job_name TEXT NOT NULL,
        run_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        claimed_by TEXT,
        start_time TEXT NOT NULL,
        last_updated TEXT NOT NULL,
        PRIMARY KEY (job_name, run_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS batch_step_execution (
        job_name TEXT NOT NULL,
        run_id INTEGER NOT NULL,
        step_name TEXT NOT NULL,
        seq INTEGER NOT NULL,
        id TEXT NOT NULL,
        status TEXT NOT NULL,
        read_count INTEGER NOT NULL,
        write_count INTEGER NOT NULL,
        skip_count INTEGER NOT NULL,
        start_time TEXT,
        end_time TEXT,
        failure_cause TEXT,
        PRIMARY KEY (job_name, run_id, step_name),
        FOREIGN KEY (job_name, run_id) REFERENCES batch_job_execution (job_name, run_id)
    )
    "#,
];

fn repository_error(error: sqlx::Error) -> BatchError {
    BatchError::Repository(error.to_string())
}

fn format_time(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(|time| time.to_rfc3339())
}

fn parse_time(time: Option<String>) -> Result<Option<DateTime<Utc>>, BatchError> {
    time.map(|time| {
        DateTime::parse_from_rfc3339(&time)
            .map(|time| time.with_timezone(&Utc))
            .map_err(|error| {
                BatchError::Repository(format!("invalid timestamp {}: {}", time, error))
            })
    })
    .transpose()
}

fn to_count(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn from_count(count: i64) -> usize {
    usize::try_from(count).unwrap_or_default()
}

/// Job repository persisting executions in SQLite tables
/// `batch_job_execution` and `batch_step_execution`.
///
/// ```no_run
/// use geo_batch::core::repository::SqliteJobRepository;
/// use sqlx::SqlitePool;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = SqlitePool::connect("sqlite://batch-repository.db?mode=rwc").await?;
/// let repository = SqliteJobRepository::new(pool).await?;
/// # Ok(())
/// # }
/// ```
pub struct SqliteJobRepository {
    pool: Pool<Sqlite>,
}

impl SqliteJobRepository {
    /// Creates the repository, creating its tables when missing.
    pub async fn new(pool: Pool<Sqlite>) -> Result<Self, BatchError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(repository_error)?;
        }
        debug!("Job repository schema ready");
        Ok(Self { pool })
    }

    fn map_step(row: &SqliteRow) -> Result<StepExecution, BatchError> {
        let id: String = row.try_get("id").map_err(repository_error)?;
        let status: String = row.try_get("status").map_err(repository_error)?;

        Ok(StepExecution {
            id: Uuid::parse_str(&id)
                .map_err(|error| BatchError::Repository(error.to_string()))?,
            name: row.try_get("step_name").map_err(repository_error)?,
            status: status.parse()?,
            read_count: from_count(row.try_get("read_count").map_err(repository_error)?),
            write_count: from_count(row.try_get("write_count").map_err(repository_error)?),
            skip_count: from_count(row.try_get("skip_count").map_err(repository_error)?),
            start_time: parse_time(row.try_get("start_time").map_err(repository_error)?)?,
            end_time: parse_time(row.try_get("end_time").map_err(repository_error)?)?,
            failure_cause: row.try_get("failure_cause").map_err(repository_error)?,
        })
    }
}

impl JobRepository for SqliteJobRepository {
    fn create_run(&self, job_name: &str, owner: &str) -> Result<i64, BatchError> {
        let now = Utc::now().to_rfc3339();

        // Minting and inserting in one statement keeps run ids unique across processes.
        let query = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO batch_job_execution (job_name, run_id, status, claimed_by, start_time, last_updated)
            SELECT ?1, COALESCE(MAX(run_id), 0) + 1, ?2, ?3, ?4, ?4
            FROM batch_job_execution WHERE job_name = ?1
            RETURNING run_id
            "#,
        )
        .bind(job_name)
        .bind(BatchStatus::Started.to_string())
        .bind(owner)
        .bind(now);

        block_on(query.fetch_one(&self.pool))?.map_err(repository_error)
    }

    fn find_resumable_run(&self, job_name: &str) -> Result<Option<i64>, BatchError> {
        let query = sqlx::query(
            "SELECT run_id, status FROM batch_job_execution WHERE job_name = ? ORDER BY run_id DESC LIMIT 1",
        )
        .bind(job_name);

        let row = block_on(query.fetch_optional(&self.pool))?.map_err(repository_error)?;

        match row {
            Some(row) => {
                let status: String = row.try_get("status").map_err(repository_error)?;
                if status.parse::<BatchStatus>()? == BatchStatus::Completed {
                    Ok(None)
                } else {
                    Ok(Some(row.try_get("run_id").map_err(repository_error)?))
                }
            }
            None => Ok(None),
        }
    }

    fn claim_run(&self, job_name: &str, run_id: i64, owner: &str) -> Result<(), BatchError> {
        let query = sqlx::query(
            r#"
            UPDATE batch_job_execution
            SET claimed_by = ?1, status = ?2, last_updated = ?3
            WHERE job_name = ?4 AND run_id = ?5 AND (claimed_by IS NULL OR claimed_by = ?1)
            "#,
        )
        .bind(owner)
        .bind(BatchStatus::Started.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(job_name)
        .bind(run_id);

        let result = block_on(query.execute(&self.pool))?.map_err(repository_error)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.find_job_status(job_name, run_id)? {
            Some(_) => Err(BatchError::RunAlreadyClaimed {
                job: job_name.to_string(),
                run_id,
            }),
            None => Err(BatchError::Repository(format!(
                "unknown run {} of job {}",
                run_id, job_name
            ))),
        }
    }

    fn release_run(&self, job_name: &str, run_id: i64) -> Result<(), BatchError> {
        let query = sqlx::query(
            "UPDATE batch_job_execution SET claimed_by = NULL, last_updated = ? WHERE job_name = ? AND run_id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(job_name)
        .bind(run_id);

        block_on(query.execute(&self.pool))?.map_err(repository_error)?;
        Ok(())
    }

    fn update_job_status(
        &self,
        job_name: &str,
        run_id: i64,
        status: BatchStatus,
    ) -> Result<(), BatchError> {
        let query = sqlx::query(
            "UPDATE batch_job_execution SET status = ?, last_updated = ? WHERE job_name = ? AND run_id = ?",
        )
        .bind(status.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(job_name)
        .bind(run_id);

        let result = block_on(query.execute(&self.pool))?.map_err(repository_error)?;

        if result.rows_affected() == 0 {
            return Err(BatchError::Repository(format!(
                "unknown run {} of job {}",
                run_id, job_name
            )));
        }
        Ok(())
    }

    fn find_job_status(
        &self,
        job_name: &str,
        run_id: i64,
    ) -> Result<Option<BatchStatus>, BatchError> {
        let query = sqlx::query_scalar::<_, String>(
            "SELECT status FROM batch_job_execution WHERE job_name = ? AND run_id = ?",
        )
        .bind(job_name)
        .bind(run_id);

        block_on(query.fetch_optional(&self.pool))?
            .map_err(repository_error)?
            .map(|status| status.parse())
            .transpose()
    }

    fn save_step_execution(
        &self,
        job_name: &str,
        run_id: i64,
        step_execution: &StepExecution,
    ) -> Result<(), BatchError> {
        let query = sqlx::query(
            r#"
            INSERT INTO batch_step_execution (
                job_name, run_id, step_name, seq, id, status,
                read_count, write_count, skip_count, start_time, end_time, failure_cause
            )
            VALUES (
                ?1, ?2, ?3,
                (SELECT COUNT(*) FROM batch_step_execution WHERE job_name = ?1 AND run_id = ?2),
                ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
            )
            ON CONFLICT (job_name, run_id, step_name) DO UPDATE SET
                id = excluded.id,
                status = excluded.status,
                read_count = excluded.read_count,
                write_count = excluded.write_count,
                skip_count = excluded.skip_count,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                failure_cause = excluded.failure_cause
            WHERE batch_step_execution.status <> 'COMPLETED'
            "#,
        )
        .bind(job_name)
        .bind(run_id)
        .bind(&step_execution.name)
        .bind(step_execution.id.to_string())
        .bind(step_execution.status.to_string())
        .bind(to_count(step_execution.read_count))
        .bind(to_count(step_execution.write_count))
        .bind(to_count(step_execution.skip_count))
        .bind(format_time(step_execution.start_time))
        .bind(format_time(step_execution.end_time))
        .bind(step_execution.failure_cause.clone());

        let result = block_on(query.execute(&self.pool))?.map_err(repository_error)?;

        if result.rows_affected() == 0 {
            return Err(BatchError::Repository(format!(
                "step {} of run {} of job {} is already completed",
                step_execution.name, run_id, job_name
            )));
        }
        Ok(())
    }

    fn find_step_executions(
        &self,
        job_name: &str,
        run_id: i64,
    ) -> Result<Vec<StepExecution>, BatchError> {
        let query = sqlx::query(
            "SELECT * FROM batch_step_execution WHERE job_name = ? AND run_id = ? ORDER BY seq",
        )
        .bind(job_name)
        .bind(run_id);

        let rows = block_on(query.fetch_all(&self.pool))?.map_err(repository_error)?;

        rows.iter().map(Self::map_step).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
    use tempfile::NamedTempFile;

    use super::*;
    use crate::core::step::StepStatus;

    async fn setup_repository(file: &NamedTempFile) -> SqliteJobRepository {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", file.path().display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        SqliteJobRepository::new(pool).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_ids_should_increase_per_job() {
        let file = NamedTempFile::new().unwrap();
        let repository = setup_repository(&file).await;

        assert_eq!(repository.create_run("job1", "a").unwrap(), 1);
        assert_eq!(repository.create_run("job1", "b").unwrap(), 2);
        assert_eq!(repository.create_run("job2", "a").unwrap(), 1);
        assert_eq!(
            repository.find_job_status("job1", 2).unwrap(),
            Some(BatchStatus::Started)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resumable_run_should_be_latest_incomplete() {
        let file = NamedTempFile::new().unwrap();
        let repository = setup_repository(&file).await;

        let run_id = repository.create_run("job1", "a").unwrap();
        assert_eq!(repository.find_resumable_run("job1").unwrap(), Some(run_id));

        repository
            .update_job_status("job1", run_id, BatchStatus::Completed)
            .unwrap();
        assert_eq!(repository.find_resumable_run("job1").unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn claim_should_be_exclusive() {
        let file = NamedTempFile::new().unwrap();
        let repository = setup_repository(&file).await;

        let run_id = repository.create_run("job1", "a").unwrap();

        assert!(repository.claim_run("job1", run_id, "a").is_ok());
        assert!(matches!(
            repository.claim_run("job1", run_id, "b"),
            Err(BatchError::RunAlreadyClaimed { .. })
        ));
        assert!(matches!(
            repository.claim_run("job1", 42, "b"),
            Err(BatchError::Repository(_))
        ));

        repository.release_run("job1", run_id).unwrap();
        assert!(repository.claim_run("job1", run_id, "b").is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn step_executions_should_survive_a_new_repository() {
        let file = NamedTempFile::new().unwrap();
        let repository = setup_repository(&file).await;
        let run_id = repository.create_run("job1", "a").unwrap();

        let mut first = StepExecution::new("countries-to-db");
        first.status = StepStatus::Completed;
        first.read_count = 250;
        first.write_count = 248;
        first.skip_count = 2;
        first.start_time = Some(Utc::now());
        first.end_time = Some(Utc::now());
        repository.save_step_execution("job1", run_id, &first).unwrap();

        let mut second = StepExecution::new("cities-to-db");
        second.status = StepStatus::Failed;
        second.failure_cause = Some("disk full".to_string());
        repository.save_step_execution("job1", run_id, &second).unwrap();

        let reopened = setup_repository(&file).await;
        let saved = reopened.find_step_executions("job1", run_id).unwrap();

        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].name, "countries-to-db");
        assert_eq!(saved[0].status, StepStatus::Completed);
        assert_eq!(saved[0].read_count, 250);
        assert_eq!(saved[0].write_count, 248);
        assert_eq!(saved[0].skip_count, 2);
        assert_eq!(saved[0].id, first.id);
        assert!(saved[0].start_time.is_some());
        assert_eq!(saved[1].name, "cities-to-db");
        assert_eq!(saved[1].status, StepStatus::Failed);
        assert_eq!(saved[1].failure_cause.as_deref(), Some("disk full"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completed_step_should_not_be_overwritten() {
        let file = NamedTempFile::new().unwrap();
        let repository = setup_repository(&file).await;
        let run_id = repository.create_run("job1", "a").unwrap();

        let mut step_execution = StepExecution::new("countries-to-db");
        step_execution.status = StepStatus::Failed;
        repository
            .save_step_execution("job1", run_id, &step_execution)
            .unwrap();

        step_execution.status = StepStatus::Completed;
        step_execution.write_count = 3;
        repository
            .save_step_execution("job1", run_id, &step_execution)
            .unwrap();

        step_execution.write_count = 6;
        assert!(
            repository
                .save_step_execution("job1", run_id, &step_execution)
                .is_err()
        );

        let saved = repository.find_step_executions("job1", run_id).unwrap();
        assert_eq!(saved[0].write_count, 3);
    }
}
