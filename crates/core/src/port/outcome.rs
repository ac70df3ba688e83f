// Outcome Sender Port (grade passback)
//
// Delivers an aggregate score to the external system that launched the
// submission (an LMS, typically). The context travels opaquely on the job;
// this engine neither builds nor inspects it beyond what delivery needs.

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait OutcomeSender: Send + Sync {
    /// Send the aggregate score (fraction in [0, 1]) for the given opaque
    /// passback context. Callers treat failure as log-and-continue.
    async fn send_score(&self, context: &serde_json::Value, score: f64) -> Result<()>;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records every score it was asked to send.
    #[derive(Default)]
    pub struct RecordingOutcomeSender {
        pub sent: Mutex<Vec<(serde_json::Value, f64)>>,
        pub fail: bool,
    }

    impl RecordingOutcomeSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl OutcomeSender for RecordingOutcomeSender {
        async fn send_score(&self, context: &serde_json::Value, score: f64) -> Result<()> {
            if self.fail {
                return Err(crate::AppError::Internal("passback endpoint down".into()));
            }
            self.sent.lock().unwrap().push((context.clone(), score));
            Ok(())
        }
    }
}
