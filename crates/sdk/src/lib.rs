//! Gradekeep SDK - Rust Client Library
//!
//! A typed client for the Gradekeep grading daemon: enqueue a job, poll
//! its status, fetch its result, or follow it live over a WebSocket
//! subscription.
//!
//! # Example
//!
//! ```no_run
//! use gradekeep_sdk::{Action, EnqueueRequest, GradekeepClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GradekeepClient::connect("http://127.0.0.1:6010")?;
//!
//!     let mut form = serde_json::Map::new();
//!     form.insert("q1".to_string(), json!("42"));
//!
//!     let job = client.enqueue(EnqueueRequest {
//!         path: vec!["spring24".to_string(), "ps0".to_string()],
//!         username: "alice".to_string(),
//!         names: vec!["q1".to_string()],
//!         form,
//!         action: Action::Submit,
//!         external_context: None,
//!     }).await?;
//!
//!     let mut watch = client.watch(&job.magic).await?;
//!     while let Some(update) = watch.next().await {
//!         println!("{:?}", update?);
//!     }
//!
//!     let result = client.result(&job.magic).await?;
//!     println!("score: {}", result.score_box);
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::{GradekeepClient, JobWatch};
pub use error::{Result, SdkError};
pub use types::{
    Action, EnqueueRequest, EnqueueResponse, ItemOutcome, MaintenanceResponse, ResultResponse,
    StatsResponse, StatusResponse, StatusUpdate,
};
