//! Gradekeep Client Implementation

use crate::error::{Result, SdkError};
use crate::types::{
    EnqueueRequest, EnqueueResponse, MaintenanceRequest, MaintenanceResponse, ResultRequest,
    ResultResponse, StatsRequest, StatsResponse, StatusRequest, StatusResponse, StatusUpdate,
    WatchRequest,
};
use jsonrpsee::core::client::{ClientT, Subscription, SubscriptionClientT};
use jsonrpsee::core::traits::ToRpcParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::Serialize;
use serde_json::value::RawValue;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The daemon parses named parameters, so requests go over the wire as
/// one JSON object rather than a positional array.
struct NamedParams<T>(T);

impl<T: Serialize> ToRpcParams for NamedParams<T> {
    fn to_rpc_params(self) -> std::result::Result<Option<Box<RawValue>>, serde_json::Error> {
        serde_json::value::to_raw_value(&self.0).map(Some)
    }
}

/// Gradekeep daemon client.
///
/// Calls go over HTTP; [`watch`](GradekeepClient::watch) opens a
/// WebSocket connection for its subscription.
///
/// # Example
///
/// ```no_run
/// use gradekeep_sdk::GradekeepClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = GradekeepClient::connect("http://127.0.0.1:6010")?;
/// # Ok(())
/// # }
/// ```
pub struct GradekeepClient {
    client: HttpClient,
    url: String,
}

impl GradekeepClient {
    /// Create a client for the daemon at `url` (e.g. `http://127.0.0.1:6010`).
    pub fn connect(url: impl Into<String>) -> Result<Self> {
        let url = url.into();

        let client = HttpClientBuilder::default()
            .request_timeout(REQUEST_TIMEOUT)
            .build(&url)
            .map_err(|e| SdkError::Connection(format!("Failed to create client: {}", e)))?;

        Ok(Self { client, url })
    }

    /// Enqueue a grading job.
    ///
    /// The returned `magic` is the handle for [`status`](Self::status),
    /// [`result`](Self::result), and [`watch`](Self::watch).
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use gradekeep_sdk::{Action, EnqueueRequest, GradekeepClient};
    /// # use serde_json::json;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = GradekeepClient::connect("http://127.0.0.1:6010")?;
    /// let mut form = serde_json::Map::new();
    /// form.insert("q1".to_string(), json!("42"));
    ///
    /// let response = client.enqueue(EnqueueRequest {
    ///     path: vec!["spring24".to_string(), "ps0".to_string()],
    ///     username: "alice".to_string(),
    ///     names: vec!["q1".to_string()],
    ///     form,
    ///     action: Action::Submit,
    ///     external_context: None,
    /// }).await?;
    ///
    /// println!("magic: {}", response.magic);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueResponse> {
        let response = self
            .client
            .request("checker.enqueue.v1", NamedParams(request))
            .await?;
        Ok(response)
    }

    /// Where the job is right now: queued (with position), running,
    /// finished, or unknown.
    pub async fn status(&self, magic: impl Into<String>) -> Result<StatusResponse> {
        let request = StatusRequest {
            magic: magic.into(),
        };
        let response = self
            .client
            .request("checker.status.v1", NamedParams(request))
            .await?;
        Ok(response)
    }

    /// Fetch a finished job's result.
    ///
    /// Errors with code 4009 while the job is still queued or running
    /// ([`SdkError::is_not_finished`]) and 4004 for an unknown magic.
    pub async fn result(&self, magic: impl Into<String>) -> Result<ResultResponse> {
        let request = ResultRequest {
            magic: magic.into(),
        };
        let response = self
            .client
            .request("checker.result.v1", NamedParams(request))
            .await?;
        Ok(response)
    }

    /// Follow a job over a WebSocket subscription.
    ///
    /// The stream yields one event per status change and ends after the
    /// final `NewResult` event. Dropping the watch unsubscribes.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use gradekeep_sdk::GradekeepClient;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = GradekeepClient::connect("http://127.0.0.1:6010")?;
    /// let mut watch = client.watch("some-magic").await?;
    /// while let Some(update) = watch.next().await {
    ///     println!("{:?}", update?);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn watch(&self, magic: impl Into<String>) -> Result<JobWatch> {
        let ws_url = ws_url(&self.url)?;
        let client = WsClientBuilder::default()
            .request_timeout(REQUEST_TIMEOUT)
            .build(&ws_url)
            .await
            .map_err(|e| SdkError::Connection(format!("Failed to connect to {}: {}", ws_url, e)))?;

        let request = WatchRequest {
            magic: magic.into(),
        };
        let subscription = client
            .subscribe("checker.watch.v1", NamedParams(request), "checker.unwatch.v1")
            .await?;

        Ok(JobWatch {
            _client: client,
            subscription,
        })
    }

    /// Queue counts for monitoring.
    pub async fn stats(&self) -> Result<StatsResponse> {
        let response = self
            .client
            .request("admin.stats.v1", NamedParams(StatsRequest {}))
            .await?;
        Ok(response)
    }

    /// Purge finished results older than `retain_secs`.
    pub async fn maintenance(&self, retain_secs: u64) -> Result<MaintenanceResponse> {
        let request = MaintenanceRequest { retain_secs };
        let response = self
            .client
            .request("admin.maintenance.v1", NamedParams(request))
            .await?;
        Ok(response)
    }
}

/// An open `checker.watch.v1` subscription.
///
/// Holds its WebSocket connection; dropping it closes both.
#[derive(Debug)]
pub struct JobWatch {
    _client: WsClient,
    subscription: Subscription<StatusUpdate>,
}

impl JobWatch {
    /// Next status change, or `None` when the stream has ended (after
    /// the final event, or because the connection closed).
    pub async fn next(&mut self) -> Option<Result<StatusUpdate>> {
        match self.subscription.next().await {
            Some(Ok(update)) => Some(Ok(update)),
            Some(Err(e)) => Some(Err(SdkError::Serialization(e))),
            None => None,
        }
    }
}

/// Derive the WebSocket endpoint from the configured HTTP url.
fn ws_url(url: &str) -> Result<String> {
    if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(url.to_string())
    } else {
        Err(SdkError::InvalidUrl(format!(
            "expected an http(s) or ws(s) url, got {url}"
        )))
    }
}
