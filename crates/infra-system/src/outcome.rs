// HTTP Outcome Sender (grade passback)
//
// Delivers aggregate scores back to the system that launched the submission.
// The passback context rides opaquely on the job; the only field this
// adapter reads is "url", the delivery endpoint. Everything else is echoed
// back verbatim so the receiving side can correlate the submission.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use gradekeep_core::error::Result;
use gradekeep_core::port::OutcomeSender;
use gradekeep_core::AppError;

const PASSBACK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpOutcomeSender {
    client: reqwest::Client,
}

impl HttpOutcomeSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpOutcomeSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutcomeSender for HttpOutcomeSender {
    async fn send_score(&self, context: &serde_json::Value, score: f64) -> Result<()> {
        let url = context.get("url").and_then(|v| v.as_str()).ok_or_else(|| {
            AppError::Validation("passback context has no 'url' field".to_string())
        })?;

        let body = serde_json::json!({
            "score": score,
            "context": context,
        });

        let response = self
            .client
            .post(url)
            .timeout(PASSBACK_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("score passback failed: {e}")))?;

        response
            .error_for_status()
            .map_err(|e| AppError::Internal(format!("score passback rejected: {e}")))?;

        debug!(url = %url, score = %score, "Score passback delivered");
        Ok(())
    }
}
