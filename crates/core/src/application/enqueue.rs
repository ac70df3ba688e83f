// Enqueue Intake
//
// Validation happens here, before any I/O: a request that reaches the
// queue backend is already well-formed. Inline upload content is stashed
// in the upload store and replaced by an opaque reference so the queue
// payload stays small.

use crate::domain::naming::normalize_names;
use crate::domain::{Job, JobAction};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobQueue, TimeProvider, UploadStore, UPLOAD_CONTENT_KEY, UPLOAD_REF_KEY};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// A grading request as it arrives from the outer surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    /// Content path; first element is the course.
    pub path: Vec<String>,
    pub username: String,
    /// Item names as submitted, possibly decorated (`__name_suffix`).
    pub names: Vec<String>,
    #[serde(default)]
    pub form: serde_json::Map<String, serde_json::Value>,
    pub action: JobAction,
    /// Opaque grade-passback context, stored verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_context: Option<serde_json::Value>,
}

pub struct EnqueueService {
    queue: Arc<dyn JobQueue>,
    uploads: Arc<dyn UploadStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl EnqueueService {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        uploads: Arc<dyn UploadStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            queue,
            uploads,
            id_provider,
            time_provider,
        }
    }

    /// Validate, stash uploads, and enqueue. Returns the waiting job; its
    /// `id` is the magic the caller polls with.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Job> {
        validate(&request)?;

        let form = self.stash_uploads(request.form)?;
        let names = normalize_names(&request.names);
        let job = Job::new(
            self.id_provider.generate_id(),
            request.path,
            request.username,
            names,
            form,
            request.action,
            request.external_context,
            self.time_provider.now_millis(),
        );
        self.queue.enqueue(&job).await?;
        info!(
            job_id = %job.id,
            username = %job.username,
            course = %job.course(),
            action = %job.action,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Replace `{"__upload_content__": "..."}` form values with stored
    /// references.
    fn stash_uploads(
        &self,
        form: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut out = serde_json::Map::with_capacity(form.len());
        for (key, value) in form {
            let value = match inline_upload(&value) {
                Some(content) => {
                    let token = self.uploads.store(content.as_bytes())?;
                    serde_json::json!({ UPLOAD_REF_KEY: token })
                }
                None => value,
            };
            out.insert(key, value);
        }
        Ok(out)
    }
}

fn inline_upload(value: &serde_json::Value) -> Option<&str> {
    value
        .as_object()
        .filter(|o| o.len() == 1)
        .and_then(|o| o.get(UPLOAD_CONTENT_KEY))
        .and_then(|c| c.as_str())
}

fn validate(request: &EnqueueRequest) -> Result<()> {
    if request.path.is_empty() {
        return Err(AppError::Validation("path must not be empty".to_string()));
    }
    for segment in &request.path {
        validate_segment(segment, "path segment")?;
    }
    validate_segment(&request.username, "username")?;
    if request.names.is_empty() {
        return Err(AppError::Validation("names must not be empty".to_string()));
    }
    for name in &request.names {
        if name.is_empty() {
            return Err(AppError::Validation("names must not contain empty strings".to_string()));
        }
    }
    Ok(())
}

/// Path and username values become filesystem names in the log store, so
/// anything separator- or traversal-shaped is rejected outright.
fn validate_segment(segment: &str, what: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(AppError::Validation(format!("{what} must not be empty")));
    }
    if segment.contains('/') || segment.contains('\\') || segment.contains('\0') {
        return Err(AppError::Validation(format!(
            "{what} {segment:?} contains a path separator"
        )));
    }
    if segment.starts_with('.') {
        return Err(AppError::Validation(format!(
            "{what} {segment:?} must not start with '.'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobState;
    use crate::port::job_queue::mocks::InMemoryQueue;
    use crate::port::time_provider::FixedTimeProvider;
    use crate::port::uploads::mocks::InMemoryUploads;
    use crate::port::SequentialIdProvider;
    use serde_json::json;

    fn service(
        queue: Arc<InMemoryQueue>,
        uploads: Arc<InMemoryUploads>,
    ) -> EnqueueService {
        EnqueueService::new(
            queue,
            uploads,
            Arc::new(SequentialIdProvider::new()),
            Arc::new(FixedTimeProvider::new(42_000)),
        )
    }

    fn request() -> EnqueueRequest {
        EnqueueRequest {
            path: vec!["spring24".to_string(), "ps0".to_string()],
            username: "alice".to_string(),
            names: vec!["q1".to_string()],
            form: serde_json::Map::new(),
            action: JobAction::Submit,
            external_context: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_creates_waiting_job() {
        let queue = Arc::new(InMemoryQueue::new());
        let svc = service(queue.clone(), Arc::new(InMemoryUploads::new()));

        let job = svc.enqueue(request()).await.unwrap();
        assert_eq!(job.id, "job-1");
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.enqueued_at, 42_000);
        assert_eq!(queue.waiting_len(), 1);
    }

    #[tokio::test]
    async fn test_names_are_normalized_at_intake() {
        let queue = Arc::new(InMemoryQueue::new());
        let svc = service(queue.clone(), Arc::new(InMemoryUploads::new()));

        let mut req = request();
        req.names = vec![
            "__q1_check".to_string(),
            "q1".to_string(),
            "q2".to_string(),
        ];
        let job = svc.enqueue(req).await.unwrap();
        assert_eq!(job.names, vec!["q1".to_string(), "q2".to_string()]);
    }

    #[tokio::test]
    async fn test_traversal_shaped_input_rejected() {
        let queue = Arc::new(InMemoryQueue::new());
        let svc = service(queue.clone(), Arc::new(InMemoryUploads::new()));

        for bad in ["..", ".hidden", "a/b", "a\\b", ""] {
            let mut req = request();
            req.path = vec!["spring24".to_string(), bad.to_string()];
            let err = svc.enqueue(req).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "accepted {bad:?}");
        }

        let mut req = request();
        req.username = "../etc".to_string();
        assert!(matches!(
            svc.enqueue(req).await.unwrap_err(),
            AppError::Validation(_)
        ));

        // nothing reached the queue
        assert_eq!(queue.waiting_len(), 0);
    }

    #[tokio::test]
    async fn test_empty_names_rejected() {
        let queue = Arc::new(InMemoryQueue::new());
        let svc = service(queue, Arc::new(InMemoryUploads::new()));

        let mut req = request();
        req.names = vec![];
        assert!(matches!(
            svc.enqueue(req).await.unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_inline_upload_stashed_and_replaced() {
        let queue = Arc::new(InMemoryQueue::new());
        let uploads = Arc::new(InMemoryUploads::new());
        let svc = service(queue, uploads.clone());

        let mut req = request();
        req.form.insert(
            "q1".to_string(),
            json!({ UPLOAD_CONTENT_KEY: "submitted file body" }),
        );
        let job = svc.enqueue(req).await.unwrap();

        let stored = job.form.get("q1").unwrap().as_object().unwrap();
        let token = stored.get(UPLOAD_REF_KEY).unwrap().as_str().unwrap();
        assert_eq!(uploads.load(token).unwrap(), b"submitted file body");
    }

    #[tokio::test]
    async fn test_plain_form_values_pass_through() {
        let queue = Arc::new(InMemoryQueue::new());
        let svc = service(queue, Arc::new(InMemoryUploads::new()));

        let mut req = request();
        req.form.insert("q1".to_string(), json!("x = 5"));
        let job = svc.enqueue(req).await.unwrap();
        assert_eq!(job.form.get("q1").unwrap(), &json!("x = 5"));
    }
}
