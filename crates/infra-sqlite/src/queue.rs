// SQLite JobQueue Implementation

use async_trait::async_trait;
use gradekeep_core::domain::{
    Job, JobId, JobResult, JobState, QueueCounts, QueueSnapshot, RunningEntry,
};
use gradekeep_core::error::{AppError, Result};
use gradekeep_core::port::{JobQueue, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Database(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => {
                        AppError::Database(format!("Database full: {}", db_err.message()))
                    }
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteJobQueue {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, state, payload, enqueued_at, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.state.as_str())
        .bind(serde_json::to_string(job)?)
        .bind(job.enqueued_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(job_id = %job.id, "Enqueued to sqlite queue");
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        // Atomic claim: the UPDATE and the oldest-waiting SELECT are one
        // statement, so concurrent claimers can never take the same row.
        let now = self.time_provider.now_millis();
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = ?, started_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = ?
                ORDER BY seq ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(JobState::Running.as_str())
        .bind(now)
        .bind(JobState::Waiting.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|r| r.into_job()).transpose()
    }

    async fn peek_next(&self) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE state = ?
            ORDER BY seq ASC
            LIMIT 1
            "#,
        )
        .bind(JobState::Waiting.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|r| r.into_job()).transpose()
    }

    async fn running_job(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ? AND state = ?")
            .bind(id)
            .bind(JobState::Running.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|r| r.into_job()).transpose()
    }

    async fn complete(&self, id: &JobId, result: &JobResult) -> Result<()> {
        // Conditional update: completing a job that is not running must
        // fail loudly, not clobber an existing result.
        let update = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, finished_at = ?, result = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(JobState::Completed.as_str())
        .bind(result.completed_at)
        .bind(serde_json::to_string(result)?)
        .bind(id)
        .bind(JobState::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if update.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT state FROM jobs WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

            return Err(match current {
                None => AppError::InvalidState(format!("job {id} is not running")),
                Some(state) => AppError::InvalidState(format!(
                    "job {id} is not running (state {state})"
                )),
            });
        }
        debug!(job_id = %id, "Completed in sqlite queue");
        Ok(())
    }

    async fn result(&self, id: &JobId) -> Result<Option<JobResult>> {
        let stored: Option<Option<String>> =
            sqlx::query_scalar("SELECT result FROM jobs WHERE id = ? AND state = ?")
                .bind(id)
                .bind(JobState::Completed.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        match stored.flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn requeue_stale_running(&self, cutoff_millis: i64) -> Result<Vec<JobId>> {
        // Requeued rows keep their seq, which puts them back ahead of
        // anything enqueued after them.
        let mut rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET state = ?, started_at = NULL
            WHERE state = ? AND COALESCE(started_at, 0) < ?
            RETURNING id, enqueued_at
            "#,
        )
        .bind(JobState::Waiting.as_str())
        .bind(JobState::Running.as_str())
        .bind(cutoff_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.sort_by_key(|(_, enqueued_at)| *enqueued_at);
        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }

    async fn snapshot(&self) -> Result<QueueSnapshot> {
        let waiting: Vec<String> =
            sqlx::query_scalar("SELECT id FROM jobs WHERE state = ? ORDER BY seq ASC")
                .bind(JobState::Waiting.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let running: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT id, COALESCE(started_at, enqueued_at) FROM jobs
            WHERE state = ?
            ORDER BY started_at ASC
            "#,
        )
        .bind(JobState::Running.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(QueueSnapshot {
            waiting,
            running: running
                .into_iter()
                .map(|(id, started_at)| RunningEntry { id, started_at })
                .collect(),
        })
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let count_of = |state: JobState| {
            let pool = self.pool.clone();
            async move {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE state = ?")
                    .bind(state.as_str())
                    .fetch_one(&pool)
                    .await
                    .map_err(map_sqlx_error)
            }
        };
        let waiting = count_of(JobState::Waiting).await?;
        let running = count_of(JobState::Running).await?;
        let completed = count_of(JobState::Completed).await?;

        let oldest: Option<i64> =
            sqlx::query_scalar("SELECT MIN(enqueued_at) FROM jobs WHERE state = ?")
                .bind(JobState::Waiting.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(QueueCounts {
            waiting: waiting as u64,
            running: running as u64,
            completed: completed as u64,
            oldest_waiting_ms: oldest.map(|t| self.time_provider.now_millis() - t),
        })
    }

    async fn purge_results(&self, cutoff_millis: i64) -> Result<u64> {
        let deleted = sqlx::query(
            "DELETE FROM jobs WHERE state = ? AND COALESCE(finished_at, 0) < ?",
        )
        .bind(JobState::Completed.as_str())
        .bind(cutoff_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(deleted.rows_affected())
    }

    async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM jobs")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    #[allow(dead_code)]
    seq: i64,
    id: String,
    state: String,
    payload: String,
    #[allow(dead_code)]
    result: Option<String>,
    enqueued_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
}

impl JobRow {
    /// The job from its payload, with the row's columns authoritative for
    /// state and timestamps.
    fn into_job(self) -> Result<Job> {
        let mut job: Job = serde_json::from_str(&self.payload).map_err(|e| {
            AppError::Database(format!("corrupt payload for job {}: {}", self.id, e))
        })?;
        job.state = JobState::parse(&self.state)?;
        job.enqueued_at = self.enqueued_at;
        job.started_at = self.started_at;
        job.finished_at = self.finished_at;
        Ok(job)
    }
}
