// Grader Port
//
// Question-type grading stays pluggable: the engine knows how to route a
// submission to a grader by the item's kind and what shape comes back,
// never how any particular kind scores its input. Graders run inside the
// worker process, so a runaway grader can be killed without touching the
// daemon.

use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// What a grader produced for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeOutcome {
    /// Fraction in [0, 1].
    pub score: f64,
    /// Rendered message for the submitter.
    pub message: String,
    /// Grader-private payload, persisted verbatim.
    pub extra_data: Option<serde_json::Value>,
}

/// A single question-type grading implementation.
pub trait Grader: Send + Sync {
    /// Grade a real submission.
    fn grade(&self, submission: &serde_json::Value, config: &serde_json::Value)
        -> Result<GradeOutcome>;

    /// Advisory check: a rendered message, no score.
    fn check(&self, submission: &serde_json::Value, config: &serde_json::Value) -> Result<String>;
}

/// Registry of graders by item kind, assembled once at worker startup.
#[derive(Default)]
pub struct GraderRegistry {
    graders: HashMap<String, Arc<dyn Grader>>,
}

impl GraderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, grader: Arc<dyn Grader>) {
        self.graders.insert(kind.into(), grader);
    }

    pub fn resolve(&self, kind: &str) -> Option<Arc<dyn Grader>> {
        self.graders.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.graders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;

    /// Grader that always returns the same outcome.
    pub struct FixedGrader {
        pub score: f64,
        pub message: String,
    }

    impl Grader for FixedGrader {
        fn grade(
            &self,
            _submission: &serde_json::Value,
            _config: &serde_json::Value,
        ) -> Result<GradeOutcome> {
            Ok(GradeOutcome {
                score: self.score,
                message: self.message.clone(),
                extra_data: None,
            })
        }

        fn check(
            &self,
            _submission: &serde_json::Value,
            _config: &serde_json::Value,
        ) -> Result<String> {
            Ok(self.message.clone())
        }
    }

    /// Grader that always fails with an error.
    pub struct FailingGrader;

    impl Grader for FailingGrader {
        fn grade(
            &self,
            _submission: &serde_json::Value,
            _config: &serde_json::Value,
        ) -> Result<GradeOutcome> {
            Err(crate::AppError::Internal(
                "grader blew up: secret internal detail".to_string(),
            ))
        }

        fn check(
            &self,
            _submission: &serde_json::Value,
            _config: &serde_json::Value,
        ) -> Result<String> {
            Err(crate::AppError::Internal(
                "grader blew up: secret internal detail".to_string(),
            ))
        }
    }

    /// Grader that panics, for isolation testing.
    pub struct PanickingGrader;

    impl Grader for PanickingGrader {
        fn grade(
            &self,
            _submission: &serde_json::Value,
            _config: &serde_json::Value,
        ) -> Result<GradeOutcome> {
            panic!("grader panicked on purpose");
        }

        fn check(
            &self,
            _submission: &serde_json::Value,
            _config: &serde_json::Value,
        ) -> Result<String> {
            panic!("grader panicked on purpose");
        }
    }
}
