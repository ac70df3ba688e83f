// Grading invocation - runs inside the worker process
//
// One call per claimed job: de-dup the submitted names, resolve the page's
// items, dispatch each to its grader, fold the outcomes into the
// problemstate log, complete the job, and (for submits with a passback
// context) push the page-wide aggregate to the external consumer.
//
// A grader failure - Err or panic - costs exactly that item: it scores 0
// with a sanitized message, siblings still run, and the job completes.

use crate::application::panic_guard::{execute_guarded, PanicGuardResult};
use crate::domain::naming::normalize_names;
use crate::domain::{ItemOutcome, Job, JobAction, JobResult, LogValue};
use crate::error::Result;
use crate::port::{
    ContentResolver, GraderRegistry, ItemSpec, JobQueue, LogStore, OutcomeSender, PageContext,
    TimeProvider, UpdateMethod, UploadStore, UPLOAD_REF_KEY,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything one worker process needs to grade a job.
pub struct GradingService {
    queue: Arc<dyn JobQueue>,
    log_store: Arc<dyn LogStore>,
    resolver: Arc<dyn ContentResolver>,
    registry: Arc<GraderRegistry>,
    uploads: Arc<dyn UploadStore>,
    outcomes: Arc<dyn OutcomeSender>,
    time_provider: Arc<dyn TimeProvider>,
}

impl GradingService {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        log_store: Arc<dyn LogStore>,
        resolver: Arc<dyn ContentResolver>,
        registry: Arc<GraderRegistry>,
        uploads: Arc<dyn UploadStore>,
        outcomes: Arc<dyn OutcomeSender>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            queue,
            log_store,
            resolver,
            registry,
            uploads,
            outcomes,
            time_provider,
        }
    }

    /// Grade a claimed (running) job end to end.
    ///
    /// On success the job is completed in the queue and the result
    /// returned. An `Err` here means the job could not be settled at all;
    /// the worker exits nonzero and the supervisor synthesizes a failure.
    pub async fn run_job(&self, job: &Job) -> Result<JobResult> {
        info!(
            job_id = %job.id,
            username = %job.username,
            action = %job.action,
            names = ?job.names,
            "Grading job"
        );

        let names = normalize_names(&job.names);
        let context = self.resolver.resolve(&job.path).await?;

        let mut items: BTreeMap<String, ItemOutcome> = BTreeMap::new();
        for name in &names {
            let submission = self.submission_for(job, name)?;
            let outcome = match context.item(name) {
                Some(spec) => self.grade_item(job, spec, &submission),
                None => {
                    warn!(job_id = %job.id, name = %name, "No such question on page");
                    ItemOutcome::failed(format!("Unknown question: {name}"))
                }
            };
            items.insert(name.clone(), outcome);
        }

        self.record_problemstate(job, &items)?;

        let result = self.aggregate(job, &context, items);
        self.queue.complete(&job.id, &result).await?;
        info!(job_id = %job.id, score = result.score, "Job completed");

        if job.action == JobAction::Submit {
            if let Some(passback) = &job.external_context {
                let score = self.page_score(job, &context, result.score);
                if let Err(e) = self.outcomes.send_score(passback, score).await {
                    // best effort: the grade is on record either way
                    warn!(job_id = %job.id, error = %e, "Grade passback failed");
                } else {
                    info!(job_id = %job.id, score = score, "Grade passback sent");
                }
            }
        }

        Ok(result)
    }

    /// The form value for an item, with upload references swapped back for
    /// their stored content.
    fn submission_for(&self, job: &Job, name: &str) -> Result<serde_json::Value> {
        let raw = job.form.get(name).cloned().unwrap_or(serde_json::Value::Null);
        if let Some(token) = upload_token(&raw) {
            let content = self.uploads.load(token)?;
            return Ok(serde_json::Value::String(
                String::from_utf8_lossy(&content).into_owned(),
            ));
        }
        Ok(raw)
    }

    /// Dispatch one item to its grader with panic isolation.
    fn grade_item(
        &self,
        job: &Job,
        spec: &ItemSpec,
        submission: &serde_json::Value,
    ) -> ItemOutcome {
        let Some(grader) = self.registry.resolve(&spec.kind) else {
            warn!(job_id = %job.id, kind = %spec.kind, "No grader registered for kind");
            return ItemOutcome::failed(format!("No grader for question type: {}", spec.kind));
        };

        match job.action {
            JobAction::Submit => {
                match execute_guarded(|| grader.grade(submission, &spec.config)) {
                    PanicGuardResult::Success(Ok(outcome)) => {
                        let score = outcome.score.clamp(0.0, 1.0);
                        ItemOutcome {
                            score: Some(score),
                            score_box: render_score_box(score),
                            message: outcome.message,
                            extra_data: outcome.extra_data,
                        }
                    }
                    PanicGuardResult::Success(Err(e)) => {
                        error!(job_id = %job.id, name = %spec.name, error = %e, "Grader failed");
                        ItemOutcome::failed(grading_error_message())
                    }
                    PanicGuardResult::Panicked(_) => {
                        ItemOutcome::failed(grading_error_message())
                    }
                }
            }
            JobAction::Check => match execute_guarded(|| grader.check(submission, &spec.config)) {
                PanicGuardResult::Success(Ok(message)) => ItemOutcome {
                    score: None,
                    score_box: String::new(),
                    message,
                    extra_data: None,
                },
                PanicGuardResult::Success(Err(e)) => {
                    error!(job_id = %job.id, name = %spec.name, error = %e, "Check failed");
                    ItemOutcome {
                        score: None,
                        score_box: String::new(),
                        message: grading_error_message(),
                        extra_data: None,
                    }
                }
                PanicGuardResult::Panicked(_) => ItemOutcome {
                    score: None,
                    score_box: String::new(),
                    message: grading_error_message(),
                    extra_data: None,
                },
            },
        }
    }

    /// Fold the outcomes into the problemstate log under its key lock.
    ///
    /// `scores` is only touched by submits; displays, cached responses,
    /// and extra data are recorded for checks too.
    fn record_problemstate(
        &self,
        job: &Job,
        items: &BTreeMap<String, ItemOutcome>,
    ) -> Result<()> {
        let is_submit = job.action == JobAction::Submit;

        // convert everything up front so an unsupported value is rejected
        // before the log file is touched
        let mut prepared: Vec<(String, Option<f64>, String, String, LogValue)> = Vec::new();
        for (name, outcome) in items {
            let extra = match &outcome.extra_data {
                Some(v) => LogValue::from_json(v).map_err(crate::port::StoreError::from)?,
                None => LogValue::Null,
            };
            prepared.push((
                name.clone(),
                outcome.score,
                outcome.score_box.clone(),
                outcome.message.clone(),
                extra,
            ));
        }

        let default = LogValue::Map(BTreeMap::new());
        self.log_store.modify_most_recent(
            &job.username,
            &job.path,
            "problemstate",
            &default,
            Box::new(move |current| {
                let mut state = current.into_map().unwrap_or_default();
                for (name, score, score_box, message, extra) in prepared {
                    if is_submit {
                        set_section(
                            &mut state,
                            "scores",
                            &name,
                            LogValue::Float(score.unwrap_or(0.0)),
                        );
                    }
                    set_section(&mut state, "score_displays", &name, LogValue::Str(score_box));
                    set_section(
                        &mut state,
                        "cached_responses",
                        &name,
                        LogValue::Str(message),
                    );
                    set_section(&mut state, "extra_data", &name, extra);
                }
                Ok(LogValue::Map(state))
            }),
            UpdateMethod::Overwrite,
        )?;
        Ok(())
    }

    /// This job's aggregate result: per-item score weighted by the page's
    /// points, over the points of the items the job touched.
    fn aggregate(
        &self,
        job: &Job,
        context: &PageContext,
        items: BTreeMap<String, ItemOutcome>,
    ) -> JobResult {
        let completed_at = self.time_provider.now_millis();
        let response = items
            .values()
            .map(|o| o.message.as_str())
            .filter(|m| !m.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        if job.action == JobAction::Check {
            return JobResult {
                score: 0.0,
                score_box: String::new(),
                response,
                items,
                action: job.action,
                completed_at,
            };
        }

        let mut earned = 0.0;
        let mut possible = 0.0;
        for (name, outcome) in &items {
            let points = context.item(name).map(|i| i.points).unwrap_or(0.0);
            possible += points;
            earned += outcome.score.unwrap_or(0.0) * points;
        }
        let score = if possible > 0.0 {
            earned / possible
        } else if items.is_empty() {
            0.0
        } else {
            // unweighted page: plain mean keeps scores meaningful
            items
                .values()
                .map(|o| o.score.unwrap_or(0.0))
                .sum::<f64>()
                / items.len() as f64
        };

        JobResult {
            score,
            score_box: render_score_box(score),
            response,
            items,
            action: job.action,
            completed_at,
        }
    }

    /// Page-wide aggregate for passback: every recorded score in the
    /// problemstate weighted by its page points, over the whole page's
    /// points. Falls back to the job score if the state is unreadable.
    fn page_score(&self, job: &Job, context: &PageContext, job_score: f64) -> f64 {
        let total_points = context.total_points();
        if total_points <= 0.0 {
            return job_score;
        }
        let state = match self.log_store.most_recent(&job.username, &job.path, "problemstate") {
            Ok(state) => state,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Could not read problemstate for passback");
                return job_score;
            }
        };
        let scores = state
            .as_ref()
            .and_then(|s| s.as_map())
            .and_then(|m| m.get("scores"))
            .and_then(|s| s.as_map());
        let Some(scores) = scores else {
            return job_score;
        };

        let mut earned = 0.0;
        for item in &context.items {
            if let Some(fraction) = scores.get(&item.name).and_then(|v| v.as_f64()) {
                earned += fraction * item.points;
            }
        }
        earned / total_points
    }
}

/// Is this form value an upload reference?
fn upload_token(value: &serde_json::Value) -> Option<&str> {
    value
        .as_object()
        .filter(|o| o.len() == 1)
        .and_then(|o| o.get(UPLOAD_REF_KEY))
        .and_then(|t| t.as_str())
}

fn set_section(
    state: &mut BTreeMap<String, LogValue>,
    section: &str,
    name: &str,
    value: LogValue,
) {
    let entry = state
        .entry(section.to_string())
        .or_insert_with(|| LogValue::Map(BTreeMap::new()));
    match entry {
        LogValue::Map(m) => {
            m.insert(name.to_string(), value);
        }
        other => {
            // a non-map section is garbage from an older write; replace it
            let mut m = BTreeMap::new();
            m.insert(name.to_string(), value);
            *other = LogValue::Map(m);
        }
    }
}

fn render_score_box(score: f64) -> String {
    format!("{:.1}%", score * 100.0)
}

/// The student-visible text for a grader failure. Detail stays in the
/// daemon log; nothing from the error reaches the response.
fn grading_error_message() -> String {
    "An error occurred while grading this question. The staff have been notified.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::content::mocks::FixedResolver;
    use crate::port::grader::mocks::{FailingGrader, FixedGrader, PanickingGrader};
    use crate::port::job_queue::mocks::InMemoryQueue;
    use crate::port::log_store::mocks::InMemoryLogStore;
    use crate::port::outcome::mocks::RecordingOutcomeSender;
    use crate::port::time_provider::FixedTimeProvider;
    use crate::port::uploads::mocks::InMemoryUploads;
    use crate::port::Grader;
    use serde_json::json;

    fn item(name: &str, kind: &str, points: f64) -> ItemSpec {
        ItemSpec {
            name: name.to_string(),
            kind: kind.to_string(),
            points,
            config: serde_json::Value::Null,
        }
    }

    struct Harness {
        queue: Arc<InMemoryQueue>,
        log_store: Arc<InMemoryLogStore>,
        uploads: Arc<InMemoryUploads>,
        outcomes: Arc<RecordingOutcomeSender>,
        service: GradingService,
    }

    fn harness(items: Vec<ItemSpec>, registry: GraderRegistry) -> Harness {
        let queue = Arc::new(InMemoryQueue::new());
        let log_store = Arc::new(InMemoryLogStore::new());
        let uploads = Arc::new(InMemoryUploads::new());
        let outcomes = Arc::new(RecordingOutcomeSender::new());
        let service = GradingService::new(
            queue.clone(),
            log_store.clone(),
            Arc::new(FixedResolver::with_items(items)),
            Arc::new(registry),
            uploads.clone(),
            outcomes.clone(),
            Arc::new(FixedTimeProvider::new(5_000_000)),
        );
        Harness {
            queue,
            log_store,
            uploads,
            outcomes,
            service,
        }
    }

    async fn claimed(queue: &InMemoryQueue, job: Job) -> Job {
        queue.enqueue(&job).await.unwrap();
        queue.claim_next().await.unwrap().unwrap()
    }

    fn full_registry() -> GraderRegistry {
        let mut registry = GraderRegistry::new();
        registry.register(
            "always_right",
            Arc::new(FixedGrader {
                score: 1.0,
                message: "Correct!".into(),
            }),
        );
        registry.register(
            "half_credit",
            Arc::new(FixedGrader {
                score: 0.5,
                message: "Half credit.".into(),
            }),
        );
        registry.register("broken", Arc::new(FailingGrader));
        registry.register("panicky", Arc::new(PanickingGrader));
        registry
    }

    #[tokio::test]
    async fn test_submit_grades_persists_and_completes() {
        let h = harness(
            vec![item("q1", "always_right", 1.0), item("q2", "half_credit", 3.0)],
            full_registry(),
        );
        let job = claimed(
            &h.queue,
            Job::new_test(&["c", "ps0"], "alice", &["q1", "q2"]),
        )
        .await;

        let result = h.service.run_job(&job).await.unwrap();

        // weighted: (1.0*1 + 0.5*3) / 4 = 0.625
        assert!((result.score - 0.625).abs() < 1e-9);
        assert_eq!(result.score_box, "62.5%");
        assert!(result.response.contains("Correct!"));
        assert!(result.response.contains("Half credit."));

        // the queue saw the completion
        let stored = h.queue.result(&job.id).await.unwrap().unwrap();
        assert_eq!(stored, result);

        // problemstate has scores + displays + cached responses
        let state = h
            .log_store
            .most_recent("alice", &job.path, "problemstate")
            .unwrap()
            .unwrap();
        let map = state.as_map().unwrap();
        let scores = map.get("scores").unwrap().as_map().unwrap();
        assert_eq!(scores.get("q1").unwrap().as_f64(), Some(1.0));
        assert_eq!(scores.get("q2").unwrap().as_f64(), Some(0.5));
        let cached = map.get("cached_responses").unwrap().as_map().unwrap();
        assert_eq!(cached.get("q1").unwrap().as_str(), Some("Correct!"));
    }

    #[tokio::test]
    async fn test_item_failures_do_not_poison_siblings() {
        let h = harness(
            vec![
                item("good", "always_right", 1.0),
                item("bad", "broken", 1.0),
                item("worse", "panicky", 1.0),
            ],
            full_registry(),
        );
        let job = claimed(
            &h.queue,
            Job::new_test(&["c", "ps0"], "alice", &["good", "bad", "worse"]),
        )
        .await;

        let result = h.service.run_job(&job).await.unwrap();

        assert_eq!(result.items.get("good").unwrap().score, Some(1.0));
        assert_eq!(result.items.get("bad").unwrap().score, Some(0.0));
        assert_eq!(result.items.get("worse").unwrap().score, Some(0.0));
        // sanitized: internal detail must not leak into student text
        assert!(!result.response.contains("secret internal detail"));
        assert!(!result.response.contains("panicked on purpose"));
        // 1/3 aggregate
        assert!((result.score - (1.0 / 3.0)).abs() < 1e-9);
        assert!(h.queue.result(&job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_check_action_writes_no_scores() {
        let h = harness(vec![item("q1", "always_right", 1.0)], full_registry());
        let mut job = Job::new_test(&["c", "ps0"], "alice", &["q1"]);
        job.action = JobAction::Check;
        let job = claimed(&h.queue, job).await;

        let result = h.service.run_job(&job).await.unwrap();

        assert_eq!(result.score, 0.0);
        assert_eq!(result.score_box, "");
        assert_eq!(result.items.get("q1").unwrap().score, None);

        let state = h
            .log_store
            .most_recent("alice", &job.path, "problemstate")
            .unwrap()
            .unwrap();
        let map = state.as_map().unwrap();
        assert!(map.get("scores").is_none());
        assert!(map.get("cached_responses").is_some());
        // checks never push grades
        assert!(h.outcomes.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_name_scores_zero() {
        let h = harness(vec![item("q1", "always_right", 1.0)], full_registry());
        let job = claimed(
            &h.queue,
            Job::new_test(&["c", "ps0"], "alice", &["ghost"]),
        )
        .await;

        let result = h.service.run_job(&job).await.unwrap();
        assert_eq!(result.items.get("ghost").unwrap().score, Some(0.0));
        assert!(result.response.contains("Unknown question"));
    }

    #[tokio::test]
    async fn test_decorated_names_deduped_before_grading() {
        let h = harness(vec![item("q1", "always_right", 1.0)], full_registry());
        let job = claimed(
            &h.queue,
            Job::new_test(&["c", "ps0"], "alice", &["__q1_check", "q1", "__q1_b64"]),
        )
        .await;

        let result = h.service.run_job(&job).await.unwrap();
        assert_eq!(result.items.len(), 1);
        assert!(result.items.contains_key("q1"));
    }

    #[tokio::test]
    async fn test_passback_uses_page_wide_scores() {
        let h = harness(
            vec![item("q1", "always_right", 1.0), item("q2", "half_credit", 1.0)],
            full_registry(),
        );
        // q2 was graded in an earlier job: problemstate already holds it
        let mut earlier = BTreeMap::new();
        let mut scores = BTreeMap::new();
        scores.insert("q2".to_string(), LogValue::Float(0.5));
        earlier.insert("scores".to_string(), LogValue::Map(scores));
        h.log_store
            .replace(
                "alice",
                &["c".to_string(), "ps0".to_string()],
                "problemstate",
                &LogValue::Map(earlier),
            )
            .unwrap();

        let mut job = Job::new_test(&["c", "ps0"], "alice", &["q1"]);
        job.external_context = Some(json!({"service_url": "http://lms/outcome"}));
        let job = claimed(&h.queue, job).await;

        h.service.run_job(&job).await.unwrap();

        let sent = h.outcomes.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        // page-wide: (1.0*1 + 0.5*1) / 2
        assert!((sent[0].1 - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_passback_failure_does_not_fail_job() {
        let queue = Arc::new(InMemoryQueue::new());
        let log_store = Arc::new(InMemoryLogStore::new());
        let service = GradingService::new(
            queue.clone(),
            log_store,
            Arc::new(FixedResolver::with_items(vec![item(
                "q1",
                "always_right",
                1.0,
            )])),
            Arc::new(full_registry()),
            Arc::new(InMemoryUploads::new()),
            Arc::new(RecordingOutcomeSender::failing()),
            Arc::new(FixedTimeProvider::new(5_000_000)),
        );

        let mut job = Job::new_test(&["c", "ps0"], "alice", &["q1"]);
        job.external_context = Some(json!({"service_url": "http://lms/outcome"}));
        queue.enqueue(&job).await.unwrap();
        let job = queue.claim_next().await.unwrap().unwrap();

        let result = service.run_job(&job).await.unwrap();
        assert_eq!(result.score, 1.0);
        assert!(queue.result(&job.id).await.unwrap().is_some());
    }

    /// Grader that echoes the submission back, to observe what it saw.
    struct EchoGrader;

    impl Grader for EchoGrader {
        fn grade(
            &self,
            submission: &serde_json::Value,
            _config: &serde_json::Value,
        ) -> Result<crate::port::GradeOutcome> {
            Ok(crate::port::GradeOutcome {
                score: 1.0,
                message: submission.as_str().unwrap_or("<not a string>").to_string(),
                extra_data: None,
            })
        }

        fn check(
            &self,
            submission: &serde_json::Value,
            _config: &serde_json::Value,
        ) -> Result<String> {
            Ok(submission.as_str().unwrap_or("<not a string>").to_string())
        }
    }

    #[tokio::test]
    async fn test_upload_reference_resolved_before_grading() {
        let mut registry = GraderRegistry::new();
        registry.register("echo", Arc::new(EchoGrader));
        let h = harness(vec![item("essay", "echo", 1.0)], registry);

        let token = h.uploads.store(b"my uploaded essay").unwrap();
        let mut job = Job::new_test(&["c", "ps0"], "alice", &["essay"]);
        job.form.insert(
            "essay".to_string(),
            json!({ UPLOAD_REF_KEY: token }),
        );
        let job = claimed(&h.queue, job).await;

        let result = h.service.run_job(&job).await.unwrap();
        assert_eq!(
            result.items.get("essay").unwrap().message,
            "my uploaded essay"
        );
    }
}
