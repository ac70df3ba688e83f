//! gradekeep-worker - one-shot grading process
//!
//! The supervisor launches this with a single argument: the id of a job
//! it has already claimed. The process grades that job, settles the
//! result in the queue backend, and exits. The exit status is the only
//! signal the supervisor reads; nonzero means the job could not be
//! settled and a failure result is synthesized for it.

use anyhow::{bail, Result};
use gradekeep_core::application::GradingService;
use gradekeep_core::port::SystemTimeProvider;
use gradekeep_daemon::config::Config;
use gradekeep_daemon::{graders, logging, queue};
use gradekeep_infra_fs::{DataRoot, FsContentResolver, FsLogStore, FsUploadStore};
use gradekeep_infra_system::HttpOutcomeSender;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    let _log_guard = logging::init(&config, "gradekeep-worker")?;

    let Some(job_id) = std::env::args().nth(1) else {
        bail!("usage: gradekeep-worker <job-id>");
    };

    let data_root = DataRoot::new(&config.data_root);
    data_root.ensure()?;

    let time_provider = Arc::new(SystemTimeProvider);
    let job_queue = queue::build(&config, data_root.clone(), time_provider.clone()).await?;

    // The job must already be claimed; this process never claims for
    // itself, so two workers can never share one job.
    let Some(job) = job_queue.running_job(&job_id).await? else {
        bail!("job {job_id} is not in the running set");
    };

    let service = GradingService::new(
        job_queue,
        Arc::new(FsLogStore::new(data_root.clone())),
        Arc::new(FsContentResolver::new(&config.content_root)),
        Arc::new(graders::built_in_registry()),
        Arc::new(FsUploadStore::new(data_root)),
        Arc::new(HttpOutcomeSender::new()),
        time_provider,
    );

    info!(job_id = %job.id, "Worker grading job");
    match service.run_job(&job).await {
        Ok(result) => {
            info!(job_id = %job.id, score = result.score, "Worker finished");
            Ok(())
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Worker could not settle job");
            Err(e.into())
        }
    }
}
