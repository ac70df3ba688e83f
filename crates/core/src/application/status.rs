// Status Tracking
//
// Watchers poll here instead of hitting the queue backend per connection.
// One refresh loop snapshots the queue on a fixed cadence; every status
// question is answered from the cached snapshot, with one backend read
// only when a job has left the queue and its result must be fetched.

use crate::application::constants::STATUS_REFRESH_INTERVAL;
use crate::application::shutdown::ShutdownToken;
use crate::domain::{JobId, QueueSnapshot};
use crate::error::Result;
use crate::port::{JobQueue, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One point-in-time answer to "where is my job?".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StatusEvent {
    /// Waiting, with a 1-based queue position.
    InQueue { position: usize },
    /// Claimed by a worker. `started` is when; `now` is the server clock
    /// at answer time, so clients can render elapsed time without trusting
    /// their own clock.
    Running { started: i64, now: i64 },
    /// Finished. Carries what the submitter should see.
    NewResult { score_box: String, response: String },
}

impl StatusEvent {
    /// Whether two events describe the same phase of the same job, so a
    /// watcher stream can suppress no-news updates. The `now` timestamp is
    /// ignored: a running job is still just running.
    pub fn same_phase(&self, other: &StatusEvent) -> bool {
        match (self, other) {
            (StatusEvent::InQueue { position: a }, StatusEvent::InQueue { position: b }) => a == b,
            (StatusEvent::Running { started: a, .. }, StatusEvent::Running { started: b, .. }) => {
                a == b
            }
            (StatusEvent::NewResult { .. }, StatusEvent::NewResult { .. }) => true,
            _ => false,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StatusEvent::NewResult { .. })
    }
}

/// Shared, periodically refreshed view of the queue.
pub struct StatusTracker {
    queue: Arc<dyn JobQueue>,
    time_provider: Arc<dyn TimeProvider>,
    snapshot: RwLock<QueueSnapshot>,
    refresh_interval: Duration,
}

impl StatusTracker {
    pub fn new(queue: Arc<dyn JobQueue>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            queue,
            time_provider,
            snapshot: RwLock::new(QueueSnapshot::default()),
            refresh_interval: STATUS_REFRESH_INTERVAL,
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Re-read the queue into the cached snapshot.
    pub async fn refresh(&self) -> Result<()> {
        let snapshot = self.queue.snapshot().await?;
        *self.snapshot.write().await = snapshot;
        Ok(())
    }

    /// Refresh on a fixed cadence until shutdown. Errors are logged and
    /// retried on the next tick; a stale snapshot beats a dead tracker.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!("Status tracker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "Status refresh failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {}
                _ = shutdown.wait() => break,
            }
        }
        debug!("Status tracker stopped");
    }

    /// Current status of a job, or `None` for an id this deployment has
    /// never heard of (or whose result has been purged).
    pub async fn status_of(&self, id: &JobId) -> Result<Option<StatusEvent>> {
        {
            let snapshot = self.snapshot.read().await;
            if let Some(position) = snapshot.position_of(id) {
                return Ok(Some(StatusEvent::InQueue { position }));
            }
            if let Some(entry) = snapshot.running_entry(id) {
                return Ok(Some(StatusEvent::Running {
                    started: entry.started_at,
                    now: self.time_provider.now_millis(),
                }));
            }
        }
        // not in the snapshot: finished, unknown, or enqueued since the
        // last refresh. The result read settles the first two; a re-check
        // of a fresh snapshot settles the last.
        if let Some(result) = self.queue.result(id).await? {
            return Ok(Some(StatusEvent::NewResult {
                score_box: result.score_box,
                response: result.response,
            }));
        }
        let snapshot = self.queue.snapshot().await?;
        if let Some(position) = snapshot.position_of(id) {
            return Ok(Some(StatusEvent::InQueue { position }));
        }
        if let Some(entry) = snapshot.running_entry(id) {
            return Ok(Some(StatusEvent::Running {
                started: entry.started_at,
                now: self.time_provider.now_millis(),
            }));
        }
        Ok(None)
    }
}
