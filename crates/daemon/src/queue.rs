// Queue Backend Selection
//
// gradekeepd and gradekeep-worker build the backend from the same
// configuration so both processes always see one queue.

use crate::config::{Config, QueueBackend};
use anyhow::{Context, Result};
use gradekeep_core::port::{JobQueue, TimeProvider};
use gradekeep_infra_fs::{DataRoot, FsJobQueue};
use gradekeep_infra_sqlite::{create_pool, run_migrations, SqliteJobQueue};
use std::sync::Arc;
use tracing::info;

pub async fn build(
    config: &Config,
    data_root: DataRoot,
    time_provider: Arc<dyn TimeProvider>,
) -> Result<Arc<dyn JobQueue>> {
    match config.queue_backend {
        QueueBackend::Fs => {
            info!(root = %data_root.path().display(), "Using filesystem queue backend");
            let queue = FsJobQueue::new(data_root, time_provider)
                .context("opening filesystem queue")?;
            Ok(Arc::new(queue))
        }
        QueueBackend::Sqlite => {
            info!(db = %config.db_path.display(), "Using sqlite queue backend");
            let pool = create_pool(&config.db_path.to_string_lossy())
                .await
                .context("opening sqlite queue")?;
            run_migrations(&pool)
                .await
                .context("running queue migrations")?;
            Ok(Arc::new(SqliteJobQueue::new(pool, time_provider)))
        }
    }
}
