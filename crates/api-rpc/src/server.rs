//! JSON-RPC Server
//!
//! One TCP listener serves the request/response methods over HTTP and the
//! `checker.watch.v1` subscription over WebSocket. Binds localhost only.

use crate::error::code;
use crate::handler::RpcHandler;
use crate::types::{
    EnqueueRequest, MaintenanceRequest, ResultRequest, StatsRequest, StatusRequest, WatchRequest,
};
use gradekeep_core::application::constants::STATUS_REFRESH_INTERVAL;
use gradekeep_core::application::{EnqueueService, StatusEvent, StatusTracker};
use gradekeep_core::port::{JobQueue, TimeProvider};
use jsonrpsee::server::{
    PendingSubscriptionSink, PingConfig, Server, ServerHandle, SubscriptionMessage,
    SubscriptionSink,
};
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_RPC_ADDR: &str = "127.0.0.1:6010";
const DEFAULT_RATE_LIMIT_PER_SEC: u32 = 50;

// Idle watch subscriptions outlive most proxies' timeouts without these.
const WS_PING_INTERVAL: Duration = Duration::from_secs(30);

/// RPC Server Configuration
pub struct RpcServerConfig {
    pub addr: String,
    /// Enqueue tokens per second; burst is twice this.
    pub rate_limit_per_sec: u32,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_RPC_ADDR.to_string(),
            rate_limit_per_sec: DEFAULT_RATE_LIMIT_PER_SEC,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(
        config: RpcServerConfig,
        enqueue: Arc<EnqueueService>,
        status: Arc<StatusTracker>,
        queue: Arc<dyn JobQueue>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let handler = Arc::new(RpcHandler::new(
            enqueue,
            status,
            queue,
            time_provider,
            config.rate_limit_per_sec,
        ));
        Self { config, handler }
    }

    /// Start the JSON-RPC server
    pub async fn start(self) -> Result<ServerHandle, String> {
        let addr = &self.config.addr;

        info!(addr = %addr, "Starting JSON-RPC server");

        let server = Server::builder()
            .enable_ws_ping(PingConfig::new().ping_interval(WS_PING_INTERVAL))
            .build(addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;

        let mut module = RpcModule::new(());

        // Register methods
        let handler = self.handler.clone();
        module
            .register_async_method("checker.enqueue.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: EnqueueRequest = params.parse()?;
                    handler.enqueue(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("checker.status.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: StatusRequest = params.parse()?;
                    handler.status(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("checker.result.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ResultRequest = params.parse()?;
                    handler.result(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_subscription(
                "checker.watch.v1",
                "checker.watch.v1.event",
                "checker.unwatch.v1",
                move |params, pending, _, _| {
                    let handler = handler.clone();
                    async move {
                        let req: WatchRequest = match params.parse() {
                            Ok(req) => req,
                            Err(e) => {
                                pending.reject(e).await;
                                return;
                            }
                        };
                        watch_job(handler, pending, req.magic).await;
                    }
                },
            )
            .map_err(|e| e.to_string())?;

        // Admin APIs
        let handler = self.handler.clone();
        module
            .register_async_method("admin.stats.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: StatsRequest = params.parse()?;
                    handler.stats(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.maintenance.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: MaintenanceRequest = params.parse()?;
                    handler.maintenance(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        info!("JSON-RPC server started");

        let handle = server.start(module);
        Ok(handle)
    }
}

/// Push status events for one job until it reaches `newresult` or the
/// subscriber goes away. Only phase changes are pushed; a job that sits at
/// queue position 3 produces one message, not one per poll.
async fn watch_job(handler: Arc<RpcHandler>, pending: PendingSubscriptionSink, magic: String) {
    let first = match handler.status_event(&magic).await {
        Ok(Some(event)) => event,
        Ok(None) => {
            pending
                .reject(ErrorObjectOwned::owned(
                    code::NOT_FOUND,
                    format!("Job {magic} not found"),
                    None::<()>,
                ))
                .await;
            return;
        }
        Err(e) => {
            pending.reject(e).await;
            return;
        }
    };

    let sink = match pending.accept().await {
        Ok(sink) => sink,
        Err(_) => return, // subscriber went away before accept
    };
    debug!(magic = %magic, "Watch subscription started");

    let mut last = first;
    if push_event(&sink, &last).await.is_err() || last.is_final() {
        return;
    }

    loop {
        tokio::select! {
            _ = sink.closed() => {
                debug!(magic = %magic, "Watch subscriber disconnected");
                return;
            }
            _ = tokio::time::sleep(STATUS_REFRESH_INTERVAL) => {}
        }

        let event = match handler.status_event(&magic).await {
            Ok(Some(event)) => event,
            // purged mid-watch, or a backend error: nothing more to say
            Ok(None) | Err(_) => return,
        };
        if !event.same_phase(&last) {
            if push_event(&sink, &event).await.is_err() || event.is_final() {
                return;
            }
            last = event;
        }
    }
}

async fn push_event(sink: &SubscriptionSink, event: &StatusEvent) -> Result<(), ()> {
    let msg = SubscriptionMessage::from_json(event).map_err(|_| ())?;
    sink.send(msg).await.map_err(|_| ())
}
