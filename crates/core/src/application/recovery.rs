// Crash recovery
//
// Anything in the running table at daemon startup is an orphan: its worker
// died with the previous daemon (workers carry a parent-death signal), so
// the claim can never complete. Return those jobs to the front of the
// queue before admitting anything new.

use crate::error::Result;
use crate::port::{JobQueue, TimeProvider};
use tracing::{info, warn};

/// Requeue running jobs orphaned by a crash. Returns how many.
///
/// Runs before the supervisor's first admission, so a recovered job cannot
/// race its own stale entry.
pub async fn requeue_orphaned_jobs(
    queue: &dyn JobQueue,
    time_provider: &dyn TimeProvider,
) -> Result<usize> {
    let now = time_provider.now_millis();
    let requeued = queue.requeue_stale_running(now).await?;

    for job_id in &requeued {
        warn!(job_id = %job_id, "Requeued orphaned running job");
    }
    info!(count = requeued.len(), "Orphaned job recovery complete");

    Ok(requeued.len())
}
