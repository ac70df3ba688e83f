//! SDK Request/Response Types
//!
//! Mirrors the daemon's JSON-RPC wire types, so this crate has no
//! dependency on the server side.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the daemon should do with the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Advisory feedback only; no score is recorded.
    Check,
    /// Grade for credit.
    Submit,
}

/// Parameters for `checker.enqueue.v1`.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueRequest {
    /// Page path; first element is the course.
    pub path: Vec<String>,
    pub username: String,
    /// Question names to grade.
    pub names: Vec<String>,
    /// Submitted answers keyed by question name.
    pub form: serde_json::Map<String, serde_json::Value>,
    pub action: Action,
    /// Opaque passback context forwarded to the grade consumer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_context: Option<serde_json::Value>,
}

/// Response from `checker.enqueue.v1`.
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueResponse {
    /// The handle every other call takes.
    pub magic: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StatusRequest {
    pub magic: String,
}

/// Response from `checker.status.v1`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    /// "inqueue", "running", "results", or "unknown".
    pub state: String,
    /// 1-based queue position, when waiting.
    pub position: Option<usize>,
    /// Claim time in epoch ms, when running.
    pub started: Option<i64>,
    /// Server clock at answer time, when running.
    pub now: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ResultRequest {
    pub magic: String,
}

/// Response from `checker.result.v1`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultResponse {
    /// Weighted fraction in [0, 1] over the items this job graded.
    pub score: f64,
    pub score_box: String,
    pub response: String,
    pub items: BTreeMap<String, ItemOutcome>,
    pub action: Action,
    pub completed_at: i64,
}

/// Per-question outcome inside a [`ResultResponse`].
#[derive(Debug, Clone, Deserialize)]
pub struct ItemOutcome {
    /// Fraction in [0, 1]; `None` for check actions.
    pub score: Option<f64>,
    pub score_box: String,
    pub message: String,
    #[serde(default)]
    pub extra_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct WatchRequest {
    pub magic: String,
}

/// One event on a `checker.watch.v1` subscription.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StatusUpdate {
    /// Waiting, with a 1-based queue position.
    InQueue { position: usize },
    /// Claimed by a worker.
    Running { started: i64, now: i64 },
    /// Finished; the stream ends after this.
    NewResult { score_box: String, response: String },
}

impl StatusUpdate {
    pub fn is_final(&self) -> bool {
        matches!(self, StatusUpdate::NewResult { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StatsRequest {}

/// Response from `admin.stats.v1`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsResponse {
    pub waiting: u64,
    pub running: u64,
    pub completed: u64,
    /// Age of the oldest waiting job in ms, if any are waiting.
    pub oldest_waiting_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct MaintenanceRequest {
    pub retain_secs: u64,
}

/// Response from `admin.maintenance.v1`.
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceResponse {
    /// Finished results deleted.
    pub purged: u64,
}
