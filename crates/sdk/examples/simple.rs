//! Simple SDK Example
//!
//! Demonstrates basic usage of the Gradekeep SDK.
//!
//! # Usage
//!
//! 1. Start the daemon:
//!    ```bash
//!    cargo run --package gradekeep-daemon --bin gradekeepd
//!    ```
//!
//! 2. Run this example:
//!    ```bash
//!    cargo run --example simple
//!    ```

use gradekeep_sdk::{Action, EnqueueRequest, GradekeepClient, StatusUpdate};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Gradekeep SDK - Simple Example");
    println!("==============================\n");

    // 1. Connect to the daemon
    println!("1. Connecting to daemon...");
    let client = GradekeepClient::connect("http://127.0.0.1:6010")?;
    println!("   ✓ Connected\n");

    // 2. Submit a job
    println!("2. Submitting answers...");
    let mut form = serde_json::Map::new();
    form.insert("q1".to_string(), json!("42"));

    let job = client
        .enqueue(EnqueueRequest {
            path: vec!["spring24".to_string(), "ps0".to_string()],
            username: "alice".to_string(),
            names: vec!["q1".to_string()],
            form,
            action: Action::Submit,
            external_context: None,
        })
        .await?;

    println!("   ✓ Job accepted:");
    println!("     - Magic: {}", job.magic);
    println!("     - State: {}\n", job.state);

    // 3. Follow it live until grading finishes
    println!("3. Watching job...");
    let mut watch = client.watch(&job.magic).await?;

    while let Some(update) = watch.next().await {
        match update? {
            StatusUpdate::InQueue { position } => {
                println!("   - in queue at position {position}");
            }
            StatusUpdate::Running { .. } => {
                println!("   - running");
            }
            StatusUpdate::NewResult { score_box, .. } => {
                println!("   - finished, score {score_box}");
                break;
            }
        }
    }
    println!();

    // 4. Fetch the full result
    println!("4. Fetching result...");
    let result = client.result(&job.magic).await?;

    println!("   ✓ Result retrieved:");
    println!("     - Score: {}", result.score_box);
    for (name, item) in &result.items {
        println!("     - {}: {} ({})", name, item.score_box, item.message);
    }

    println!("\n✓ Example completed successfully!");

    Ok(())
}
