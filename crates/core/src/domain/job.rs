// Grading Job Domain Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::error::{DomainError, Result};

/// Job ID ("magic"): an opaque UUID v4 string.
///
/// Never derived from the submission path or username, so identifiers on
/// the wire carry no information about what they refer to.
pub type JobId = String;

/// Job State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Waiting,
    Running,
    Completed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "WAITING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "WAITING" => Ok(JobState::Waiting),
            "RUNNING" => Ok(JobState::Running),
            "COMPLETED" => Ok(JobState::Completed),
            other => Err(DomainError::ValidationError(format!(
                "unknown job state: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the submitter asked for: a real submission or an advisory check.
///
/// Checks produce a rendered message only; they never record scores and
/// never push grades to an external consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Check,
    Submit,
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobAction::Check => write!(f, "check"),
            JobAction::Submit => write!(f, "submit"),
        }
    }
}

/// Grading Job Entity
///
/// One queued grading request: which page (`path`), whose submission
/// (`username`), which question items (`names`), and the raw form data the
/// graders will consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Content path, first element is the course.
    pub path: Vec<String>,
    pub username: String,
    /// De-duplicated base names of the items to grade.
    pub names: Vec<String>,
    /// Submitted form data, keyed by item name. Values may be upload
    /// references of the form `{"__upload__": "<token>"}`.
    pub form: serde_json::Map<String, serde_json::Value>,
    /// Submission wall-clock time (epoch ms), as seen by the enqueuer.
    pub time: i64,
    pub action: JobAction,
    /// Opaque grade-passback context, forwarded verbatim to the outcome
    /// sender on submit actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_context: Option<serde_json::Value>,

    pub state: JobState,
    pub enqueued_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl Job {
    /// Create a new waiting job.
    ///
    /// `id` and `now_millis` are injected, not generated: production code
    /// goes through the `IdProvider` and `TimeProvider` ports.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        path: Vec<String>,
        username: impl Into<String>,
        names: Vec<String>,
        form: serde_json::Map<String, serde_json::Value>,
        action: JobAction,
        external_context: Option<serde_json::Value>,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            path,
            username: username.into(),
            names,
            form,
            time: now_millis,
            action,
            external_context,
            state: JobState::Waiting,
            enqueued_at: now_millis,
            started_at: None,
            finished_at: None,
        }
    }

    /// The course this job belongs to (first path element).
    pub fn course(&self) -> &str {
        self.path.first().map(String::as_str).unwrap_or("")
    }

    /// Transition to Running with explicit timestamp
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        if self.state != JobState::Waiting {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "RUNNING".to_string(),
            });
        }
        self.state = JobState::Running;
        self.started_at = Some(now_millis);
        Ok(())
    }

    /// Transition to Completed with explicit timestamp
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        if self.state != JobState::Running {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "COMPLETED".to_string(),
            });
        }
        self.state = JobState::Completed;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Return a claimed-but-unfinished job to the waiting state.
    ///
    /// Used by crash recovery; the job keeps its original enqueue order so
    /// it resumes at the front of the queue.
    pub fn release(&mut self) -> Result<()> {
        if self.state != JobState::Running {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "WAITING".to_string(),
            });
        }
        self.state = JobState::Waiting;
        self.started_at = None;
        Ok(())
    }
}

impl Job {
    /// Create a test job with deterministic ID and timestamp (tests only).
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    pub fn new_test(path: &[&str], username: &str, names: &[&str]) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("test-{}", counter);
        let enqueued_at = (counter * 1000) as i64;

        Self::new(
            id,
            path.iter().map(|s| s.to_string()).collect(),
            username,
            names.iter().map(|s| s.to_string()).collect(),
            serde_json::Map::new(),
            JobAction::Submit,
            None,
            enqueued_at,
        )
    }
}

/// Outcome of grading a single question item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    /// Fraction in [0, 1]; `None` for check actions.
    pub score: Option<f64>,
    /// Rendered per-item score display ("" for checks).
    pub score_box: String,
    /// Rendered grader message.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<serde_json::Value>,
}

impl ItemOutcome {
    /// A zero-score outcome carrying an error message, used when a grader
    /// failed or no grader exists for the item.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            score: Some(0.0),
            score_box: String::new(),
            message: message.into(),
            extra_data: None,
        }
    }
}

/// Aggregate result of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Weighted aggregate fraction in [0, 1]; 0.0 for checks and failures.
    pub score: f64,
    /// Rendered score widget for the aggregate.
    pub score_box: String,
    /// Rendered response shown to the submitter.
    pub response: String,
    /// Per-item outcomes keyed by base item name.
    pub items: BTreeMap<String, ItemOutcome>,
    pub action: JobAction,
    pub completed_at: i64, // epoch ms
}

impl JobResult {
    /// A synthesized failure result (score 0) for a job whose worker died
    /// without reporting.
    pub fn failure(action: JobAction, message: impl Into<String>, now_millis: i64) -> Self {
        Self {
            score: 0.0,
            score_box: String::new(),
            response: message.into(),
            items: BTreeMap::new(),
            action,
            completed_at: now_millis,
        }
    }
}
