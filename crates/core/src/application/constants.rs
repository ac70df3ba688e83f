// Application constants (no magic values in the loops)
use std::time::Duration;

/// Supervisor tick: how often to reap, kill, and admit (100 ms)
pub const SUPERVISOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep after a supervisor tick error before retrying (1 s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// How often the status tracker refreshes its queue snapshot (300 ms)
pub const STATUS_REFRESH_INTERVAL: Duration = Duration::from_millis(300);

/// Default number of worker processes allowed at once
pub const DEFAULT_PARALLEL_CHECKS: usize = 2;

/// Default wall-clock limit for one grading job (60 s)
pub const DEFAULT_GLOBAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-key lock acquisition retry interval (50 ms)
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Give up on a per-key lock after this long (30 s)
pub const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Response for a worker the supervisor had to kill
pub const TIMEOUT_RESPONSE: &str =
    "Your submission could not be checked because the checker ran for too long.";

/// Response for a worker that died without reporting (exit code in context)
pub const CRASH_RESPONSE: &str =
    "Your submission could not be checked because of an unknown error.";
