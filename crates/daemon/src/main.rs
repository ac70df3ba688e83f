//! gradekeepd - the grading daemon
//!
//! Hosts the JSON-RPC surface, the shared status tracker, and the worker
//! supervisor. Grading itself happens in separate gradekeep-worker
//! processes so a runaway check can be killed by process group without
//! touching the daemon.

use anyhow::{Context, Result};
use gradekeep_api_rpc::{RpcServer, RpcServerConfig};
use gradekeep_core::application::{
    shutdown_channel, EnqueueService, StatusTracker, Supervisor, SupervisorConfig,
};
use gradekeep_core::port::{SystemTimeProvider, UuidProvider};
use gradekeep_daemon::config::Config;
use gradekeep_daemon::{logging, queue};
use gradekeep_infra_fs::{DataRoot, FsUploadStore};
use gradekeep_infra_system::SystemWorkerLauncher;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    let _log_guard = logging::init(&config, "gradekeepd")?;

    info!("gradekeepd v{} starting", VERSION);

    let data_root = DataRoot::new(&config.data_root);
    data_root.ensure().with_context(|| {
        format!("creating data root at {}", config.data_root.display())
    })?;

    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);

    let job_queue = queue::build(&config, data_root.clone(), time_provider.clone()).await?;

    let uploads = Arc::new(FsUploadStore::new(data_root));
    let enqueue = Arc::new(EnqueueService::new(
        job_queue.clone(),
        uploads,
        id_provider,
        time_provider.clone(),
    ));
    let status = Arc::new(
        StatusTracker::new(job_queue.clone(), time_provider.clone())
            .with_refresh_interval(config.status_refresh),
    );

    let rpc_server = RpcServer::new(
        RpcServerConfig {
            addr: config.rpc_addr.clone(),
            rate_limit_per_sec: config.rpc_rate_limit,
        },
        enqueue,
        status.clone(),
        job_queue.clone(),
        time_provider.clone(),
    );
    let rpc_handle = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {e}"))?;

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let status_handle = tokio::spawn({
        let status = status.clone();
        let token = shutdown_tx.subscribe();
        async move { status.run(token).await }
    });

    // Workers derive their configuration from the same resolved values
    // the daemon runs with, not from re-expanding their own environment.
    let launcher = Arc::new(
        SystemWorkerLauncher::new(&config.worker_bin)
            .with_env("GRADEKEEP_DATA_ROOT", config.data_root.to_string_lossy())
            .with_env("GRADEKEEP_QUEUE_BACKEND", config.queue_backend.as_str())
            .with_env("GRADEKEEP_DB_PATH", config.db_path.to_string_lossy())
            .with_env(
                "GRADEKEEP_CONTENT_ROOT",
                config.content_root.to_string_lossy(),
            ),
    );
    info!(worker_bin = %config.worker_bin.display(), "Starting supervisor");
    let supervisor = Supervisor::new(
        job_queue,
        launcher,
        time_provider,
        SupervisorConfig {
            parallel_checks: config.parallel_checks,
            global_timeout: config.global_timeout,
            poll_interval: config.poll_interval,
        },
    );
    let supervisor_handle = tokio::spawn(async move {
        if let Err(e) = supervisor.run(shutdown_rx).await {
            error!(error = %e, "Supervisor failed");
        }
    });

    info!(addr = %config.rpc_addr, "Ready; accepting jobs");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown_tx.shutdown();
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server stop failed");
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), supervisor_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), status_handle).await;

    info!("Shutdown complete");
    Ok(())
}
