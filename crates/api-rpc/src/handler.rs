//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method. Only enqueue is
//! rate limited; status and result reads are cheap snapshot lookups.

use crate::error::{code, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    EnqueueRequest, EnqueueResponse, MaintenanceRequest, MaintenanceResponse, ResultRequest,
    ResultResponse, StatsRequest, StatsResponse, StatusRequest, StatusResponse,
};
use gradekeep_core::application::enqueue as enqueue_service;
use gradekeep_core::application::{EnqueueService, StatusEvent, StatusTracker};
use gradekeep_core::domain::JobId;
use gradekeep_core::port::{JobQueue, TimeProvider};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tracing::info;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    enqueue: Arc<EnqueueService>,
    status: Arc<StatusTracker>,
    queue: Arc<dyn JobQueue>,
    time_provider: Arc<dyn TimeProvider>,
    rate_limiter: RateLimiter,
}

impl RpcHandler {
    pub fn new(
        enqueue: Arc<EnqueueService>,
        status: Arc<StatusTracker>,
        queue: Arc<dyn JobQueue>,
        time_provider: Arc<dyn TimeProvider>,
        rate_limit_per_sec: u32,
    ) -> Self {
        Self {
            enqueue,
            status,
            queue,
            time_provider,
            rate_limiter: RateLimiter::new(rate_limit_per_sec.saturating_mul(2), rate_limit_per_sec),
        }
    }

    /// checker.enqueue.v1
    pub async fn enqueue(
        &self,
        params: EnqueueRequest,
    ) -> Result<EnqueueResponse, ErrorObjectOwned> {
        if !self.rate_limiter.check() {
            return Err(ErrorObjectOwned::owned(
                code::RATE_LIMITED,
                "Rate limit exceeded. Please slow down.",
                None::<()>,
            ));
        }

        let request = enqueue_service::EnqueueRequest {
            path: params.path,
            username: params.username,
            names: params.names,
            form: params.form,
            action: params.action,
            external_context: params.external_context,
        };

        let job = self.enqueue.enqueue(request).await.map_err(to_rpc_error)?;

        Ok(EnqueueResponse {
            magic: job.id,
            state: job.state.to_string(),
        })
    }

    /// checker.status.v1
    pub async fn status(&self, params: StatusRequest) -> Result<StatusResponse, ErrorObjectOwned> {
        let event = self.status_event(&params.magic).await?;
        Ok(StatusResponse::from_event(event))
    }

    /// checker.result.v1
    pub async fn result(&self, params: ResultRequest) -> Result<ResultResponse, ErrorObjectOwned> {
        if let Some(result) = self
            .queue
            .result(&params.magic)
            .await
            .map_err(to_rpc_error)?
        {
            return Ok(result.into());
        }
        // No result yet: distinguish in-flight from never-seen.
        match self.status_event(&params.magic).await? {
            Some(_) => Err(ErrorObjectOwned::owned(
                code::NOT_FINISHED,
                format!("Job {} is not finished", params.magic),
                None::<()>,
            )),
            None => Err(ErrorObjectOwned::owned(
                code::NOT_FOUND,
                format!("Job {} not found", params.magic),
                None::<()>,
            )),
        }
    }

    /// admin.stats.v1
    pub async fn stats(&self, _params: StatsRequest) -> Result<StatsResponse, ErrorObjectOwned> {
        let counts = self.queue.counts().await.map_err(to_rpc_error)?;
        Ok(counts.into())
    }

    /// admin.maintenance.v1
    pub async fn maintenance(
        &self,
        params: MaintenanceRequest,
    ) -> Result<MaintenanceResponse, ErrorObjectOwned> {
        let cutoff =
            self.time_provider.now_millis() - (params.retain_secs as i64).saturating_mul(1000);
        let purged = self
            .queue
            .purge_results(cutoff)
            .await
            .map_err(to_rpc_error)?;
        info!(purged, retain_secs = params.retain_secs, "Result purge completed");
        Ok(MaintenanceResponse { purged })
    }

    /// Current status event for one job; the watch subscription polls this.
    pub async fn status_event(
        &self,
        magic: &JobId,
    ) -> Result<Option<StatusEvent>, ErrorObjectOwned> {
        self.status.status_of(magic).await.map_err(to_rpc_error)
    }
}
