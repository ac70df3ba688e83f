//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results. Status responses use
//! the same lowercase state names as the watch subscription events, so
//! polling and subscribing clients share one vocabulary.

use gradekeep_core::application::StatusEvent;
use gradekeep_core::domain::{ItemOutcome, JobAction, JobResult, QueueCounts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// checker.enqueue.v1 - Enqueue a grading job
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    /// Content path; first element is the course.
    pub path: Vec<String>,
    pub username: String,
    /// Item names as submitted, possibly decorated (`__name_suffix`).
    pub names: Vec<String>,
    #[serde(default)]
    pub form: serde_json::Map<String, serde_json::Value>,
    pub action: JobAction,
    #[serde(default)]
    pub external_context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnqueueResponse {
    /// The job id the caller polls and watches with.
    pub magic: String,
    pub state: String,
}

/// checker.status.v1 - Point-in-time job status
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub magic: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// "inqueue", "running", "results", or "unknown".
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub now: Option<i64>,
}

impl StatusResponse {
    pub fn from_event(event: Option<StatusEvent>) -> Self {
        match event {
            Some(StatusEvent::InQueue { position }) => Self {
                state: "inqueue".to_string(),
                position: Some(position),
                started: None,
                now: None,
            },
            Some(StatusEvent::Running { started, now }) => Self {
                state: "running".to_string(),
                position: None,
                started: Some(started),
                now: Some(now),
            },
            Some(StatusEvent::NewResult { .. }) => Self {
                state: "results".to_string(),
                position: None,
                started: None,
                now: None,
            },
            None => Self {
                state: "unknown".to_string(),
                position: None,
                started: None,
                now: None,
            },
        }
    }
}

/// checker.result.v1 - Fetch a finished job's result
#[derive(Debug, Deserialize)]
pub struct ResultRequest {
    pub magic: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultResponse {
    pub score: f64,
    pub score_box: String,
    pub response: String,
    pub items: BTreeMap<String, ItemOutcome>,
    pub action: JobAction,
    pub completed_at: i64,
}

impl From<JobResult> for ResultResponse {
    fn from(result: JobResult) -> Self {
        Self {
            score: result.score,
            score_box: result.score_box,
            response: result.response,
            items: result.items,
            action: result.action,
            completed_at: result.completed_at,
        }
    }
}

/// checker.watch.v1 - Subscribe to live status for one job
#[derive(Debug, Deserialize)]
pub struct WatchRequest {
    pub magic: String,
}

/// admin.stats.v1 - Queue counters
#[derive(Debug, Deserialize)]
pub struct StatsRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub waiting: u64,
    pub running: u64,
    pub completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_waiting_ms: Option<i64>,
}

impl From<QueueCounts> for StatsResponse {
    fn from(counts: QueueCounts) -> Self {
        Self {
            waiting: counts.waiting,
            running: counts.running,
            completed: counts.completed,
            oldest_waiting_ms: counts.oldest_waiting_ms,
        }
    }
}

/// admin.maintenance.v1 - Purge old results
#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    /// Results finished within this many seconds are kept.
    pub retain_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceResponse {
    pub purged: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enqueue_request_defaults() {
        let req: EnqueueRequest = serde_json::from_value(json!({
            "path": ["spring24", "ps0"],
            "username": "alice",
            "names": ["q1"],
            "action": "submit",
        }))
        .unwrap();
        assert!(req.form.is_empty());
        assert!(req.external_context.is_none());
        assert_eq!(req.action, JobAction::Submit);
    }

    #[test]
    fn test_status_response_omits_absent_fields() {
        let resp = StatusResponse::from_event(Some(StatusEvent::InQueue { position: 3 }));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, json!({"state": "inqueue", "position": 3}));

        let resp = StatusResponse::from_event(None);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, json!({"state": "unknown"}));
    }

    #[test]
    fn test_status_response_running_carries_clocks() {
        let resp = StatusResponse::from_event(Some(StatusEvent::Running {
            started: 1_000,
            now: 2_000,
        }));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, json!({"state": "running", "started": 1000, "now": 2000}));
    }
}
