// Daemon Configuration
//
// Everything comes from GRADEKEEP_* environment variables, with defaults
// for a single-host deployment. Unparseable values fall back to the
// default with a warning rather than refusing to start; a grading daemon
// that is up with one bad knob beats one that is down.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const DEFAULT_DATA_ROOT: &str = "~/.gradekeep";
const DEFAULT_RPC_ADDR: &str = "127.0.0.1:6010";
const DEFAULT_PARALLEL_CHECKS: usize = 2;
const DEFAULT_GLOBAL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_STATUS_REFRESH_MS: u64 = 300;
const DEFAULT_RPC_RATE_LIMIT: u32 = 50;
const WORKER_BIN_NAME: &str = "gradekeep-worker";

/// Which JobQueue implementation backs the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Fs,
    Sqlite,
}

impl QueueBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fs" => Some(Self::Fs),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fs => "fs",
            Self::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Root for queue state, record logs, and upload blobs.
    pub data_root: PathBuf,
    /// Root the content resolver reads page definitions from.
    pub content_root: PathBuf,
    pub queue_backend: QueueBackend,
    /// SQLite database file (sqlite backend only).
    pub db_path: PathBuf,
    pub rpc_addr: String,
    /// Max concurrent worker processes.
    pub parallel_checks: usize,
    /// Wall-clock limit per job before its process group is killed.
    pub global_timeout: Duration,
    /// Supervisor loop tick.
    pub poll_interval: Duration,
    /// Status snapshot refresh cadence.
    pub status_refresh: Duration,
    pub worker_bin: PathBuf,
    pub log_format: LogFormat,
    /// Daily-rolling log file directory; stderr when unset.
    pub log_dir: Option<PathBuf>,
    /// Enqueue tokens per second (burst is twice this).
    pub rpc_rate_limit: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let data_root = PathBuf::from(
            env_string("GRADEKEEP_DATA_ROOT", DEFAULT_DATA_ROOT, |s| {
                shellexpand::tilde(s).into_owned()
            }),
        );
        let content_root = std::env::var("GRADEKEEP_CONTENT_ROOT")
            .map(|s| PathBuf::from(shellexpand::tilde(&s).into_owned()))
            .unwrap_or_else(|_| data_root.join("content"));
        let db_path = std::env::var("GRADEKEEP_DB_PATH")
            .map(|s| PathBuf::from(shellexpand::tilde(&s).into_owned()))
            .unwrap_or_else(|_| data_root.join("queue.db"));

        Self {
            queue_backend: env_enum("GRADEKEEP_QUEUE_BACKEND", QueueBackend::Fs, QueueBackend::parse),
            rpc_addr: env_string("GRADEKEEP_RPC_ADDR", DEFAULT_RPC_ADDR, |s| s.to_string()),
            parallel_checks: env_parse("GRADEKEEP_PARALLEL_CHECKS", DEFAULT_PARALLEL_CHECKS).max(1),
            global_timeout: Duration::from_secs(env_parse(
                "GRADEKEEP_GLOBAL_TIMEOUT_SECS",
                DEFAULT_GLOBAL_TIMEOUT_SECS,
            )),
            poll_interval: Duration::from_millis(env_parse(
                "GRADEKEEP_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            status_refresh: Duration::from_millis(env_parse(
                "GRADEKEEP_STATUS_REFRESH_MS",
                DEFAULT_STATUS_REFRESH_MS,
            )),
            worker_bin: std::env::var("GRADEKEEP_WORKER_BIN")
                .map(|s| PathBuf::from(shellexpand::tilde(&s).into_owned()))
                .unwrap_or_else(|_| default_worker_bin()),
            log_format: env_enum("GRADEKEEP_LOG_FORMAT", LogFormat::Pretty, LogFormat::parse),
            log_dir: std::env::var("GRADEKEEP_LOG_DIR")
                .ok()
                .map(|s| PathBuf::from(shellexpand::tilde(&s).into_owned())),
            rpc_rate_limit: env_parse("GRADEKEEP_RPC_RATE_LIMIT", DEFAULT_RPC_RATE_LIMIT),
            data_root,
            content_root,
            db_path,
        }
    }
}

fn env_string(key: &str, default: &str, expand: impl Fn(&str) -> String) -> String {
    match std::env::var(key) {
        Ok(s) if !s.trim().is_empty() => expand(&s),
        _ => expand(default),
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(s) => s.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %s, "Unparseable setting, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_enum<T: Copy>(key: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
    match std::env::var(key) {
        Ok(s) => parse(&s).unwrap_or_else(|| {
            warn!(key, value = %s, "Unknown setting, using default");
            default
        }),
        Err(_) => default,
    }
}

/// The worker binary ships next to the daemon binary.
fn default_worker_bin() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BIN_NAME)))
        .unwrap_or_else(|| PathBuf::from(WORKER_BIN_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    // env::var reads are process-global, so tests stick to the pure
    // parsing helpers.

    #[test]
    fn test_backend_parse() {
        assert_eq!(QueueBackend::parse("fs"), Some(QueueBackend::Fs));
        assert_eq!(QueueBackend::parse("SQLite"), Some(QueueBackend::Sqlite));
        assert_eq!(QueueBackend::parse(" sqlite "), Some(QueueBackend::Sqlite));
        assert_eq!(QueueBackend::parse("postgres"), None);
        assert_eq!(QueueBackend::parse(""), None);
    }

    #[test]
    fn test_backend_round_trips_as_str() {
        for backend in [QueueBackend::Fs, QueueBackend::Sqlite] {
            assert_eq!(QueueBackend::parse(backend.as_str()), Some(backend));
        }
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("Pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_default_worker_bin_is_sibling() {
        let bin = default_worker_bin();
        assert_eq!(
            bin.file_name().and_then(|n| n.to_str()),
            Some(WORKER_BIN_NAME)
        );
    }
}
