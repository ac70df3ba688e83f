// Supervisor - single polling loop over the job queue
//
// One async loop owns the whole fan-out: requeue orphans at startup, then
// every tick reap exited workers, kill anything over the global timeout,
// and claim new jobs up to the parallelism limit. Grading itself happens
// in separate OS processes, so the only state here is the table of live
// workers; everything durable lives behind the queue port.

use crate::application::constants::*;
use crate::application::recovery;
use crate::application::shutdown::ShutdownToken;
use crate::domain::{Job, JobId, JobResult};
use crate::error::Result;
use crate::port::{JobQueue, TimeProvider, WorkerExit, WorkerLauncher, WorkerProcess};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Supervisor tuning, from daemon configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Max concurrent worker processes.
    pub parallel_checks: usize,
    /// Wall-clock limit per job before the worker group is killed.
    pub global_timeout: Duration,
    /// Loop tick interval.
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            parallel_checks: DEFAULT_PARALLEL_CHECKS,
            global_timeout: DEFAULT_GLOBAL_TIMEOUT,
            poll_interval: SUPERVISOR_POLL_INTERVAL,
        }
    }
}

struct ActiveWorker {
    job: Job,
    process: Box<dyn WorkerProcess>,
    started_at: i64,
    kill_sent: bool,
}

/// The grading supervisor.
pub struct Supervisor {
    queue: Arc<dyn JobQueue>,
    launcher: Arc<dyn WorkerLauncher>,
    time_provider: Arc<dyn TimeProvider>,
    config: SupervisorConfig,
    active: HashMap<JobId, ActiveWorker>,
}

impl Supervisor {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        launcher: Arc<dyn WorkerLauncher>,
        time_provider: Arc<dyn TimeProvider>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            queue,
            launcher,
            time_provider,
            config,
            active: HashMap::new(),
        }
    }

    /// Run the supervisor loop until shutdown.
    pub async fn run(mut self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(
            parallel_checks = self.config.parallel_checks,
            global_timeout_secs = self.config.global_timeout.as_secs(),
            "Supervisor started"
        );

        recovery::requeue_orphaned_jobs(self.queue.as_ref(), self.time_provider.as_ref()).await?;

        loop {
            if shutdown.is_shutdown() {
                break;
            }
            if let Err(e) = self.tick().await {
                error!(error = %e, "Supervisor tick failed");
                tokio::select! {
                    _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                    _ = shutdown.wait() => break,
                }
                continue;
            }
            tokio::select! {
                _ = sleep(self.config.poll_interval) => {},
                _ = shutdown.wait() => break,
            }
        }

        self.kill_remaining();
        info!("Supervisor stopped");
        Ok(())
    }

    /// One reap / kill / admit round. Public so tests can step the loop
    /// deterministically.
    pub async fn tick(&mut self) -> Result<()> {
        self.reap().await?;
        self.kill_overdue();
        self.admit().await?;
        Ok(())
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Collect exited workers and settle their jobs.
    async fn reap(&mut self) -> Result<()> {
        let mut finished: Vec<(JobId, WorkerExit)> = Vec::new();
        for (id, worker) in self.active.iter_mut() {
            match worker.process.try_wait() {
                Ok(Some(exit)) => finished.push((id.clone(), exit)),
                Ok(None) => {}
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Failed to poll worker; will retry");
                }
            }
        }
        for (id, exit) in finished {
            if let Some(worker) = self.active.remove(&id) {
                self.finalize(worker, exit).await?;
            }
        }
        Ok(())
    }

    /// A worker is gone; either it reported a result or we synthesize one.
    async fn finalize(&self, worker: ActiveWorker, exit: WorkerExit) -> Result<()> {
        let id = worker.job.id.clone();

        if self.queue.result(&id).await?.is_some() {
            if exit.clean() {
                info!(job_id = %id, "Worker finished");
            } else {
                // e.g. killed in the instant after it completed
                warn!(
                    job_id = %id,
                    code = ?exit.code,
                    signal = ?exit.signal,
                    "Worker died after reporting its result"
                );
            }
            return Ok(());
        }

        let response = match (exit.signal, exit.code) {
            (Some(_), _) => TIMEOUT_RESPONSE.to_string(),
            (None, Some(code)) => format!("{CRASH_RESPONSE} (exit={code})"),
            (None, None) => CRASH_RESPONSE.to_string(),
        };
        let result = JobResult::failure(
            worker.job.action,
            response,
            self.time_provider.now_millis(),
        );

        match self.queue.complete(&id, &result).await {
            Ok(()) => {
                error!(
                    job_id = %id,
                    code = ?exit.code,
                    signal = ?exit.signal,
                    "Worker died without reporting; synthesized failure result"
                );
                Ok(())
            }
            Err(crate::AppError::InvalidState(_)) => {
                // lost the race against the worker's own completion
                info!(job_id = %id, "Worker completed during finalization");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// SIGKILL the process group of any worker over the global timeout.
    fn kill_overdue(&mut self) {
        let now = self.time_provider.now_millis();
        let timeout_ms = self.config.global_timeout.as_millis() as i64;

        for (id, worker) in self.active.iter_mut() {
            if worker.kill_sent {
                continue;
            }
            let elapsed = now - worker.started_at;
            if elapsed > timeout_ms {
                warn!(
                    job_id = %id,
                    pid = worker.process.pid(),
                    elapsed_ms = elapsed,
                    "Global timeout exceeded, killing worker process group"
                );
                match worker.process.kill_group() {
                    Ok(()) => worker.kill_sent = true,
                    Err(e) => {
                        warn!(job_id = %id, error = %e, "Failed to kill worker group")
                    }
                }
            }
        }
    }

    /// Claim and launch jobs while slots are open.
    async fn admit(&mut self) -> Result<()> {
        while self.active.len() < self.config.parallel_checks {
            let job = match self.queue.claim_next().await? {
                Some(job) => job,
                None => break,
            };
            let started_at = self.time_provider.now_millis();

            match self.launcher.launch(&job) {
                Ok(process) => {
                    info!(
                        job_id = %job.id,
                        pid = process.pid(),
                        username = %job.username,
                        action = %job.action,
                        "Worker started"
                    );
                    self.active.insert(
                        job.id.clone(),
                        ActiveWorker {
                            job,
                            process,
                            started_at,
                            kill_sent: false,
                        },
                    );
                }
                Err(e) => {
                    // settle the claim so the job does not wedge in running
                    error!(job_id = %job.id, error = %e, "Failed to launch worker");
                    let result = JobResult::failure(job.action, CRASH_RESPONSE, started_at);
                    self.queue.complete(&job.id, &result).await?;
                }
            }
        }
        Ok(())
    }

    /// On daemon shutdown: kill every live group. The claims stay in the
    /// running table and the next startup requeues them.
    fn kill_remaining(&mut self) {
        for (id, worker) in self.active.iter_mut() {
            info!(job_id = %id, "Killing worker at shutdown");
            if let Err(e) = worker.process.kill_group() {
                warn!(job_id = %id, error = %e, "Failed to kill worker at shutdown");
            }
        }
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobAction;
    use crate::port::job_queue::mocks::InMemoryQueue;
    use crate::port::time_provider::FixedTimeProvider;
    use crate::port::worker_launcher::mocks::{MockExit, MockLauncher};

    fn config(parallel: usize, timeout_secs: u64) -> SupervisorConfig {
        SupervisorConfig {
            parallel_checks: parallel,
            global_timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn supervisor(
        queue: Arc<InMemoryQueue>,
        launcher: MockLauncher,
        clock: Arc<FixedTimeProvider>,
        cfg: SupervisorConfig,
    ) -> Supervisor {
        Supervisor::new(queue, Arc::new(launcher), clock, cfg)
    }

    #[tokio::test]
    async fn test_admits_in_fifo_order_up_to_limit() {
        let queue = Arc::new(InMemoryQueue::new());
        let a = Job::new_test(&["c", "ps0"], "alice", &["q1"]);
        let b = Job::new_test(&["c", "ps0"], "bob", &["q1"]);
        let c = Job::new_test(&["c", "ps0"], "carol", &["q1"]);
        for job in [&a, &b, &c] {
            queue.enqueue(job).await.unwrap();
        }

        let launcher = MockLauncher::new(vec![
            MockExit::UntilKilled,
            MockExit::UntilKilled,
            MockExit::UntilKilled,
        ]);
        let clock = Arc::new(FixedTimeProvider::new(1_000_000));
        let mut sup = supervisor(queue.clone(), launcher, clock, config(2, 60));

        sup.tick().await.unwrap();

        assert_eq!(sup.active_len(), 2);
        assert_eq!(queue.waiting_len(), 1);
        let snap = queue.snapshot().await.unwrap();
        assert_eq!(snap.waiting, vec![c.id.clone()]);
        assert!(snap.running_entry(&a.id).is_some());
        assert!(snap.running_entry(&b.id).is_some());
    }

    #[tokio::test]
    async fn test_crashed_worker_gets_failure_result() {
        let queue = Arc::new(InMemoryQueue::new());
        let job = Job::new_test(&["c", "ps0"], "alice", &["q1"]);
        queue.enqueue(&job).await.unwrap();

        let launcher = MockLauncher::new(vec![MockExit::AfterPolls(0, 3)]);
        let clock = Arc::new(FixedTimeProvider::new(1_000_000));
        let mut sup = supervisor(queue.clone(), launcher, clock, config(1, 60));

        sup.tick().await.unwrap(); // admit
        sup.tick().await.unwrap(); // reap crash

        assert_eq!(sup.active_len(), 0);
        let result = queue.result(&job.id).await.unwrap().unwrap();
        assert_eq!(result.score, 0.0);
        assert!(result.response.contains("unknown error"));
        assert!(result.response.contains("exit=3"));
    }

    #[tokio::test]
    async fn test_timeout_kills_group_and_synthesizes() {
        let queue = Arc::new(InMemoryQueue::new());
        let job = Job::new_test(&["c", "ps0"], "alice", &["q1"]);
        queue.enqueue(&job).await.unwrap();

        let launcher = MockLauncher::new(vec![MockExit::UntilKilled]);
        let clock = Arc::new(FixedTimeProvider::new(1_000_000));
        let mut sup = supervisor(queue.clone(), launcher, clock.clone(), config(1, 60));

        sup.tick().await.unwrap(); // admit
        assert_eq!(sup.active_len(), 1);

        clock.advance(61_000);
        sup.tick().await.unwrap(); // kill
        assert_eq!(sup.active_len(), 1); // dead but not yet reaped

        sup.tick().await.unwrap(); // reap the killed worker
        assert_eq!(sup.active_len(), 0);

        let result = queue.result(&job.id).await.unwrap().unwrap();
        assert_eq!(result.score, 0.0);
        assert_eq!(result.response, TIMEOUT_RESPONSE);
    }

    #[tokio::test]
    async fn test_clean_exit_with_result_is_untouched() {
        let queue = Arc::new(InMemoryQueue::new());
        let job = Job::new_test(&["c", "ps0"], "alice", &["q1"]);
        queue.enqueue(&job).await.unwrap();

        let launcher = MockLauncher::new(vec![MockExit::AfterPolls(1, 0)]);
        let clock = Arc::new(FixedTimeProvider::new(1_000_000));
        let mut sup = supervisor(queue.clone(), launcher, clock, config(1, 60));

        sup.tick().await.unwrap(); // admit

        // worker reports its own result, then exits 0
        let reported = JobResult {
            score: 1.0,
            score_box: "100.0%".into(),
            response: "all good".into(),
            items: Default::default(),
            action: JobAction::Submit,
            completed_at: 1_000_500,
        };
        queue.complete(&job.id, &reported).await.unwrap();

        sup.tick().await.unwrap(); // poll once (still running)
        sup.tick().await.unwrap(); // reap clean exit

        assert_eq!(sup.active_len(), 0);
        let result = queue.result(&job.id).await.unwrap().unwrap();
        assert_eq!(result, reported); // not replaced by a synthetic failure
    }

    #[tokio::test]
    async fn test_slot_frees_after_reap() {
        let queue = Arc::new(InMemoryQueue::new());
        let first = Job::new_test(&["c", "ps0"], "alice", &["q1"]);
        let second = Job::new_test(&["c", "ps0"], "bob", &["q1"]);
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        let launcher =
            MockLauncher::new(vec![MockExit::AfterPolls(0, 1), MockExit::UntilKilled]);
        let clock = Arc::new(FixedTimeProvider::new(1_000_000));
        let mut sup = supervisor(queue.clone(), launcher, clock, config(1, 60));

        sup.tick().await.unwrap(); // admit first
        assert_eq!(sup.active_len(), 1);

        sup.tick().await.unwrap(); // reap first (crash), admit second
        assert_eq!(sup.active_len(), 1);

        assert!(queue.result(&first.id).await.unwrap().is_some());
        let snap = queue.snapshot().await.unwrap();
        assert!(snap.running_entry(&second.id).is_some());
    }
}
