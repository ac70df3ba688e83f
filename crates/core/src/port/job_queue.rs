// Job Queue Port (Interface)
//
// The queue owns every job state transition. There is no shared in-process
// queue object: the daemon, workers, and the RPC surface all talk to an
// implementation of this trait, so each operation must be safe against
// concurrent callers in other OS processes.

use crate::domain::{Job, JobId, JobResult, QueueCounts, QueueSnapshot};
use crate::error::Result;
use async_trait::async_trait;

/// Queue interface for grading jobs.
///
/// Implementations: directory-tree backend (rename as the atomic
/// transition) and SQLite backend (conditional UPDATE as the atomic
/// transition).
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a new waiting job at the back of the queue.
    async fn enqueue(&self, job: &Job) -> Result<()>;

    /// Atomically claim the oldest waiting job and move it to running.
    ///
    /// At most one caller across all processes observes any given job;
    /// everyone else sees `None` or a different job.
    async fn claim_next(&self) -> Result<Option<Job>>;

    /// Non-destructive look at the oldest waiting job.
    async fn peek_next(&self) -> Result<Option<Job>>;

    /// Fetch a running job by id (used by workers to load their claim).
    async fn running_job(&self, id: &JobId) -> Result<Option<Job>>;

    /// Complete a running job with its result.
    ///
    /// Fails with `AppError::InvalidState` if the job is not running, so a
    /// double completion (worker finished, then the supervisor tried to
    /// synthesize) is loud rather than silent.
    async fn complete(&self, id: &JobId, result: &JobResult) -> Result<()>;

    /// Result of a completed job, if present. Results stay until an
    /// explicit purge; completion is never cleaned up implicitly.
    async fn result(&self, id: &JobId) -> Result<Option<JobResult>>;

    /// Return running jobs started before `cutoff_millis` to the FRONT of
    /// the waiting queue. Called at daemon startup with `now` to recover
    /// claims orphaned by a crash.
    async fn requeue_stale_running(&self, cutoff_millis: i64) -> Result<Vec<JobId>>;

    /// Point-in-time view of waiting order and the running table.
    async fn snapshot(&self) -> Result<QueueSnapshot>;

    /// Aggregate counters for the stats surface.
    async fn counts(&self) -> Result<QueueCounts>;

    /// Delete completed results finished before `cutoff_millis`.
    /// Returns the number deleted.
    async fn purge_results(&self, cutoff_millis: i64) -> Result<u64>;

    /// Remove every job and result. Test harness helper; not reachable
    /// from any public surface.
    async fn clear_all(&self) -> Result<()>;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::RunningEntry;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Default)]
    struct QueueInner {
        waiting: VecDeque<Job>,
        running: HashMap<JobId, Job>,
        results: HashMap<JobId, (Job, JobResult)>,
    }

    /// In-memory queue for application-layer tests.
    #[derive(Default)]
    pub struct InMemoryQueue {
        inner: Mutex<QueueInner>,
    }

    impl InMemoryQueue {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn waiting_len(&self) -> usize {
            self.inner.lock().unwrap().waiting.len()
        }

        pub fn running_len(&self) -> usize {
            self.inner.lock().unwrap().running.len()
        }
    }

    #[async_trait]
    impl JobQueue for InMemoryQueue {
        async fn enqueue(&self, job: &Job) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.waiting.push_back(job.clone());
            Ok(())
        }

        async fn claim_next(&self) -> Result<Option<Job>> {
            let mut inner = self.inner.lock().unwrap();
            match inner.waiting.pop_front() {
                Some(mut job) => {
                    job.state = crate::domain::JobState::Running;
                    job.started_at = Some(job.enqueued_at + 1);
                    inner.running.insert(job.id.clone(), job.clone());
                    Ok(Some(job))
                }
                None => Ok(None),
            }
        }

        async fn peek_next(&self) -> Result<Option<Job>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.waiting.front().cloned())
        }

        async fn running_job(&self, id: &JobId) -> Result<Option<Job>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.running.get(id).cloned())
        }

        async fn complete(&self, id: &JobId, result: &JobResult) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            match inner.running.remove(id) {
                Some(mut job) => {
                    job.state = crate::domain::JobState::Completed;
                    job.finished_at = Some(result.completed_at);
                    inner.results.insert(id.clone(), (job, result.clone()));
                    Ok(())
                }
                None => Err(crate::AppError::InvalidState(format!(
                    "job {id} is not running"
                ))),
            }
        }

        async fn result(&self, id: &JobId) -> Result<Option<JobResult>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.results.get(id).map(|(_, r)| r.clone()))
        }

        async fn requeue_stale_running(&self, cutoff_millis: i64) -> Result<Vec<JobId>> {
            let mut inner = self.inner.lock().unwrap();
            let stale: Vec<JobId> = inner
                .running
                .values()
                .filter(|j| j.started_at.unwrap_or(0) < cutoff_millis)
                .map(|j| j.id.clone())
                .collect();
            let mut released: Vec<Job> = Vec::new();
            for id in &stale {
                if let Some(mut job) = inner.running.remove(id) {
                    job.state = crate::domain::JobState::Waiting;
                    job.started_at = None;
                    released.push(job);
                }
            }
            // oldest first at the very front
            released.sort_by_key(|j| j.enqueued_at);
            for job in released.into_iter().rev() {
                inner.waiting.push_front(job);
            }
            Ok(stale)
        }

        async fn snapshot(&self) -> Result<QueueSnapshot> {
            let inner = self.inner.lock().unwrap();
            Ok(QueueSnapshot {
                waiting: inner.waiting.iter().map(|j| j.id.clone()).collect(),
                running: inner
                    .running
                    .values()
                    .map(|j| RunningEntry {
                        id: j.id.clone(),
                        started_at: j.started_at.unwrap_or(0),
                    })
                    .collect(),
            })
        }

        async fn counts(&self) -> Result<QueueCounts> {
            let inner = self.inner.lock().unwrap();
            Ok(QueueCounts {
                waiting: inner.waiting.len() as u64,
                running: inner.running.len() as u64,
                completed: inner.results.len() as u64,
                oldest_waiting_ms: None,
            })
        }

        async fn purge_results(&self, cutoff_millis: i64) -> Result<u64> {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.results.len();
            inner
                .results
                .retain(|_, (job, _)| job.finished_at.unwrap_or(0) >= cutoff_millis);
            Ok((before - inner.results.len()) as u64)
        }

        async fn clear_all(&self) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            *inner = QueueInner::default();
            Ok(())
        }
    }
}
