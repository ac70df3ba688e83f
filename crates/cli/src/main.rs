//! gradekeep - command-line client for the grading daemon
//!
//! A thin JSON-RPC front end: enqueue a job, ask where it is, fetch its
//! result, or follow it until it finishes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:6010";
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "gradekeep")]
#[command(about = "Gradekeep grading queue CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "GRADEKEEP_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a grading job
    Enqueue {
        /// Page path, slash-separated (e.g. "spring24/ps0")
        #[arg(short, long)]
        path: String,

        /// Submitting user
        #[arg(short, long)]
        username: String,

        /// Question names to grade, comma-separated
        #[arg(short, long, value_delimiter = ',')]
        names: Vec<String>,

        /// Submitted answers as a JSON object keyed by question name
        #[arg(short, long, default_value = "{}")]
        form: String,

        /// "submit" grades for credit, "check" gives advisory feedback
        #[arg(short, long, default_value = "submit")]
        action: String,
    },

    /// Show where a job is (queued, running, finished)
    Status {
        /// The magic returned by enqueue
        magic: String,
    },

    /// Fetch a finished job's result
    Result {
        /// The magic returned by enqueue
        magic: String,
    },

    /// Follow a job until it finishes, then print its result
    Watch {
        /// The magic returned by enqueue
        magic: String,
    },

    /// Show queue statistics
    Stats,

    /// Purge finished results older than a retention window
    Purge {
        /// Keep results newer than this many seconds
        #[arg(long, default_value = "604800")]
        retain_secs: u64,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
struct EnqueueRow {
    magic: String,
    state: String,
}

#[derive(Tabled)]
struct ItemRow {
    name: String,
    score: String,
    message: String,
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn print_status(status: &serde_json::Value) {
    match status["state"].as_str().unwrap_or("unknown") {
        "inqueue" => println!(
            "{} position {}",
            "● queued".yellow().bold(),
            status["position"]
        ),
        "running" => {
            let started = status["started"].as_i64().unwrap_or(0);
            let now = status["now"].as_i64().unwrap_or(started);
            let elapsed = (now - started).max(0) as f64 / 1000.0;
            println!("{} for {:.1}s", "● running".cyan().bold(), elapsed);
        }
        "results" => println!("{}", "● finished".green().bold()),
        other => println!("{} ({})", "● unknown".red().bold(), other),
    }
}

fn print_result(result: &serde_json::Value) {
    if result["action"] == "submit" {
        let score_box = result["score_box"].as_str().unwrap_or("");
        println!("{} {}", "Score:".bold(), score_box.green().bold());
    }
    if let Some(items) = result["items"].as_object() {
        let rows: Vec<ItemRow> = items
            .iter()
            .map(|(name, outcome)| ItemRow {
                name: name.clone(),
                score: outcome["score_box"].as_str().unwrap_or("").to_string(),
                message: outcome["message"].as_str().unwrap_or("").to_string(),
            })
            .collect();
        if !rows.is_empty() {
            println!("{}", Table::new(rows));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Enqueue {
            path,
            username,
            names,
            form,
            action,
        } => {
            let path_segments: Vec<String> = path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            let form_json: serde_json::Value =
                serde_json::from_str(&form).context("Invalid JSON form")?;

            let params = json!({
                "path": path_segments,
                "username": username,
                "names": names,
                "form": form_json,
                "action": action,
            });

            let result = call_rpc(&cli.rpc_url, "checker.enqueue.v1", params).await?;
            let row: EnqueueRow = serde_json::from_value(result)?;

            println!("{}", "✓ Job enqueued".green().bold());
            println!();
            println!("{}", Table::new(vec![row]));
        }

        Commands::Status { magic } => {
            let status =
                call_rpc(&cli.rpc_url, "checker.status.v1", json!({"magic": magic})).await?;
            print_status(&status);
        }

        Commands::Result { magic } => {
            let result =
                call_rpc(&cli.rpc_url, "checker.result.v1", json!({"magic": magic})).await?;
            print_result(&result);
        }

        Commands::Watch { magic } => {
            let mut last: Option<(String, Option<i64>)> = None;
            loop {
                let status =
                    call_rpc(&cli.rpc_url, "checker.status.v1", json!({"magic": magic})).await?;
                let state = status["state"].as_str().unwrap_or("unknown").to_string();
                if state == "unknown" {
                    anyhow::bail!("job {magic} is not known to the daemon");
                }

                let phase = (state.clone(), status["position"].as_i64());
                if last.as_ref() != Some(&phase) {
                    print_status(&status);
                    last = Some(phase);
                }

                if state == "results" {
                    let result =
                        call_rpc(&cli.rpc_url, "checker.result.v1", json!({"magic": magic}))
                            .await?;
                    print_result(&result);
                    break;
                }
                tokio::time::sleep(WATCH_POLL_INTERVAL).await;
            }
        }

        Commands::Stats => {
            println!("{}", "Queue".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "admin.stats.v1", json!({})).await {
                Ok(stats) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!();
                    println!("  {} {}", "Waiting:".bold(), stats["waiting"]);
                    println!("  {} {}", "Running:".bold(), stats["running"]);
                    println!("  {} {}", "Completed:".bold(), stats["completed"]);
                    if let Some(age) = stats["oldest_waiting_ms"].as_i64() {
                        println!(
                            "  {} {:.1}s",
                            "Oldest waiting:".bold(),
                            age as f64 / 1000.0
                        );
                    }
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "OFFLINE".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Purge { retain_secs } => {
            let result = call_rpc(
                &cli.rpc_url,
                "admin.maintenance.v1",
                json!({"retain_secs": retain_secs}),
            )
            .await?;
            println!(
                "{}",
                format!("✓ {} result(s) purged", result["purged"]).green().bold()
            );
        }
    }

    Ok(())
}
