// Filesystem Job Queue
//
// Directory-per-state, one JSON file per job. Every transition is a
// rename on the same filesystem, so each move is atomic and a claim can
// be won by exactly one caller:
//
//   enqueue   staging -> queued/<rank>-<enqueued_at>-<id>
//   claim     queued/<name> -> running/<id>   (rename race decides)
//   complete  staging -> results/<c0>/<c1>/<id>, unlink running/<id>
//   requeue   running/<id> -> queued/0-<enqueued_at>-<id>
//
// Queued file names sort lexicographically into claim order. Rank 0 is
// reserved for requeued jobs so work that already waited once goes back
// to the front, ordered among itself by original enqueue time.

use crate::layout::DataRoot;
use async_trait::async_trait;
use gradekeep_core::domain::{
    Job, JobId, JobResult, JobState, QueueCounts, QueueSnapshot, RunningEntry,
};
use gradekeep_core::error::{AppError, Result};
use gradekeep_core::port::{JobQueue, TimeProvider};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const RANK_REQUEUED: u8 = 0;
const RANK_NORMAL: u8 = 1;

/// What a result file holds: the finished job plus its result.
#[derive(Debug, Serialize, Deserialize)]
struct CompletedEntry {
    job: Job,
    result: JobResult,
}

pub struct FsJobQueue {
    root: DataRoot,
    time_provider: Arc<dyn TimeProvider>,
}

impl FsJobQueue {
    pub fn new(root: DataRoot, time_provider: Arc<dyn TimeProvider>) -> Result<Self> {
        root.ensure()?;
        Ok(Self {
            root,
            time_provider,
        })
    }

    fn running_path(&self, id: &str) -> PathBuf {
        self.root.running().join(id)
    }

    fn result_path(&self, id: &str) -> PathBuf {
        let mut chars = id.chars();
        let a = chars.next().unwrap_or('_');
        let b = chars.next().unwrap_or('_');
        self.root
            .results()
            .join(a.to_string())
            .join(b.to_string())
            .join(id)
    }

    /// Write a file via staging + rename so nothing half-written ever
    /// carries a real name.
    fn write_staged(&self, id: &str, bytes: &[u8], dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.root.staging().join(format!("{id}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, dest)?;
        Ok(())
    }

    /// Queued file names, sorted into claim order.
    fn sorted_queued(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.root.queued())? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if parse_queued_name(&name).is_some() {
                names.push(name);
            } else {
                warn!(name = %name, "Foreign file in queued dir, skipping");
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    fn read_job(path: &Path) -> Result<Option<Job>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn running_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(self.root.running())? {
            if let Some(job) = Self::read_job(&entry?.path())? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Walk every result file.
    fn for_each_result(&self, mut f: impl FnMut(&Path) -> Result<()>) -> Result<()> {
        for shard_a in fs::read_dir(self.root.results())? {
            let shard_a = shard_a?.path();
            if !shard_a.is_dir() {
                continue;
            }
            for shard_b in fs::read_dir(&shard_a)? {
                let shard_b = shard_b?.path();
                if !shard_b.is_dir() {
                    continue;
                }
                for file in fs::read_dir(&shard_b)? {
                    f(&file?.path())?;
                }
            }
        }
        Ok(())
    }
}

fn queued_name(rank: u8, enqueued_at: i64, id: &str) -> String {
    format!("{rank}-{:020}-{id}", enqueued_at.max(0))
}

/// Parse `<rank>-<enqueued_at>-<id>`; `None` for anything else.
fn parse_queued_name(name: &str) -> Option<(i64, &str)> {
    let bytes = name.as_bytes();
    if bytes.len() < 24 || bytes[1] != b'-' || bytes[22] != b'-' {
        return None;
    }
    if !bytes[0].is_ascii_digit() {
        return None;
    }
    let enqueued_at: i64 = name[2..22].parse().ok()?;
    Some((enqueued_at, &name[23..]))
}

#[async_trait]
impl JobQueue for FsJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        let bytes = serde_json::to_vec(job)?;
        let dest = self
            .root
            .queued()
            .join(queued_name(RANK_NORMAL, job.enqueued_at, &job.id));
        self.write_staged(&job.id, &bytes, &dest)?;
        debug!(job_id = %job.id, "Enqueued to fs queue");
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();
        for name in self.sorted_queued()? {
            let Some((_, id)) = parse_queued_name(&name) else {
                continue;
            };
            let src = self.root.queued().join(&name);
            let dst = self.running_path(id);
            match fs::rename(&src, &dst) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // lost the race for this one; try the next
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let Some(mut job) = Self::read_job(&dst)? else {
                warn!(job_id = %id, "Claimed file vanished before read");
                continue;
            };
            if job.state != JobState::Waiting {
                // stale marker from a requeue that crashed mid-move
                job.state = JobState::Waiting;
                job.started_at = None;
            }
            job.start(now)?;
            self.write_staged(&job.id, &serde_json::to_vec(&job)?, &dst)?;
            debug!(job_id = %job.id, "Claimed from fs queue");
            return Ok(Some(job));
        }
        Ok(None)
    }

    async fn peek_next(&self) -> Result<Option<Job>> {
        for name in self.sorted_queued()? {
            if let Some(job) = Self::read_job(&self.root.queued().join(&name))? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn running_job(&self, id: &JobId) -> Result<Option<Job>> {
        Self::read_job(&self.running_path(id))
    }

    async fn complete(&self, id: &JobId, result: &JobResult) -> Result<()> {
        let running = self.running_path(id);
        let Some(mut job) = Self::read_job(&running)? else {
            return Err(AppError::InvalidState(format!("job {id} is not running")));
        };

        job.state = JobState::Completed;
        job.finished_at = Some(result.completed_at);
        let entry = CompletedEntry {
            job,
            result: result.clone(),
        };
        self.write_staged(id, &serde_json::to_vec(&entry)?, &self.result_path(id))?;

        if let Err(e) = fs::remove_file(&running) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        debug!(job_id = %id, "Completed in fs queue");
        Ok(())
    }

    async fn result(&self, id: &JobId) -> Result<Option<JobResult>> {
        match fs::read(self.result_path(id)) {
            Ok(bytes) => {
                let entry: CompletedEntry = serde_json::from_slice(&bytes)?;
                Ok(Some(entry.result))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn requeue_stale_running(&self, cutoff_millis: i64) -> Result<Vec<JobId>> {
        let mut stale: Vec<Job> = self
            .running_jobs()?
            .into_iter()
            .filter(|job| job.started_at.unwrap_or(0) < cutoff_millis)
            .collect();
        stale.sort_by_key(|job| job.enqueued_at);

        let mut requeued = Vec::new();
        for mut job in stale {
            let running = self.running_path(&job.id);
            if job.state == JobState::Running {
                job.state = JobState::Waiting;
                job.started_at = None;
                // rewrite in place first: a crash between the two renames
                // must not leave a RUNNING marker in the queued dir
                self.write_staged(&job.id, &serde_json::to_vec(&job)?, &running)?;
            }
            let dest = self
                .root
                .queued()
                .join(queued_name(RANK_REQUEUED, job.enqueued_at, &job.id));
            match fs::rename(&running, &dest) {
                Ok(()) => requeued.push(job.id),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // completed or requeued by someone else meanwhile
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(requeued)
    }

    async fn snapshot(&self) -> Result<QueueSnapshot> {
        let waiting = self
            .sorted_queued()?
            .iter()
            .filter_map(|name| parse_queued_name(name).map(|(_, id)| id.to_string()))
            .collect();
        let mut running: Vec<RunningEntry> = self
            .running_jobs()?
            .into_iter()
            .map(|job| RunningEntry {
                started_at: job.started_at.unwrap_or(job.enqueued_at),
                id: job.id,
            })
            .collect();
        running.sort_by_key(|e| e.started_at);
        Ok(QueueSnapshot { waiting, running })
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let queued = self.sorted_queued()?;
        let oldest_waiting_ms = queued
            .first()
            .and_then(|name| parse_queued_name(name))
            .map(|(enqueued_at, _)| self.time_provider.now_millis() - enqueued_at);
        let running = self.running_jobs()?.len() as u64;

        let mut completed = 0u64;
        self.for_each_result(|_| {
            completed += 1;
            Ok(())
        })?;

        Ok(QueueCounts {
            waiting: queued.len() as u64,
            running,
            completed,
            oldest_waiting_ms,
        })
    }

    async fn purge_results(&self, cutoff_millis: i64) -> Result<u64> {
        let mut doomed = Vec::new();
        self.for_each_result(|path| {
            let bytes = match fs::read(path) {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<CompletedEntry>(&bytes) {
                Ok(entry) if entry.result.completed_at < cutoff_millis => {
                    doomed.push(path.to_path_buf());
                }
                Ok(_) => {}
                Err(_) => {
                    warn!(path = %path.display(), "Unreadable result file, purging");
                    doomed.push(path.to_path_buf());
                }
            }
            Ok(())
        })?;

        let mut purged = 0u64;
        for path in doomed {
            match fs::remove_file(&path) {
                Ok(()) => purged += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(purged)
    }

    async fn clear_all(&self) -> Result<()> {
        for dir in [
            self.root.staging(),
            self.root.queued(),
            self.root.running(),
            self.root.results(),
        ] {
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.root.ensure()?;
        Ok(())
    }
}
