// Worker Launcher Port
//
// One grading job = one OS worker process in its own process group. The
// supervisor polls `try_wait` from its single loop, so the process handle
// is non-blocking by contract, and kill targets the whole group: anything
// a grader itself spawned dies with it.

use crate::domain::Job;
use thiserror::Error;

/// Launch errors
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Signal failed: {0}")]
    SignalFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if it was killed.
    pub signal: Option<i32>,
}

impl WorkerExit {
    pub fn clean(&self) -> bool {
        self.code == Some(0)
    }

    pub fn was_signaled(&self) -> bool {
        self.signal.is_some()
    }
}

/// Handle to a spawned worker process.
pub trait WorkerProcess: Send + Sync + std::fmt::Debug {
    fn pid(&self) -> i32;

    /// Non-blocking reap. `Ok(None)` while still running.
    fn try_wait(&mut self) -> Result<Option<WorkerExit>, LaunchError>;

    /// SIGKILL the worker's whole process group. Idempotent: a group that
    /// is already gone is not an error.
    fn kill_group(&mut self) -> Result<(), LaunchError>;
}

/// Spawns one worker process per claimed job.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, job: &Job) -> Result<Box<dyn WorkerProcess>, LaunchError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted exit behavior for one mock worker.
    #[derive(Debug, Clone)]
    pub enum MockExit {
        /// Report this exit code after N try_wait polls.
        AfterPolls(usize, i32),
        /// Keep running until kill_group, then report SIGKILL.
        UntilKilled,
    }

    #[derive(Debug)]
    pub struct MockWorker {
        pid: i32,
        polls_left: usize,
        code: i32,
        killed: bool,
        until_killed: bool,
    }

    impl WorkerProcess for MockWorker {
        fn pid(&self) -> i32 {
            self.pid
        }

        fn try_wait(&mut self) -> Result<Option<WorkerExit>, LaunchError> {
            if self.killed {
                return Ok(Some(WorkerExit {
                    code: None,
                    signal: Some(9),
                }));
            }
            if self.until_killed {
                return Ok(None);
            }
            if self.polls_left == 0 {
                Ok(Some(WorkerExit {
                    code: Some(self.code),
                    signal: None,
                }))
            } else {
                self.polls_left -= 1;
                Ok(None)
            }
        }

        fn kill_group(&mut self) -> Result<(), LaunchError> {
            self.killed = true;
            Ok(())
        }
    }

    /// Launcher that hands out scripted workers in order.
    pub struct MockLauncher {
        script: Mutex<VecDeque<MockExit>>,
        launched: Arc<Mutex<Vec<String>>>,
        next_pid: Mutex<i32>,
    }

    impl MockLauncher {
        pub fn new(script: Vec<MockExit>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                launched: Arc::new(Mutex::new(Vec::new())),
                next_pid: Mutex::new(1000),
            }
        }

        /// Job ids launched so far, in order.
        pub fn launched(&self) -> Vec<String> {
            self.launched.lock().unwrap().clone()
        }
    }

    impl WorkerLauncher for MockLauncher {
        fn launch(&self, job: &Job) -> Result<Box<dyn WorkerProcess>, LaunchError> {
            let exit = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(MockExit::AfterPolls(0, 0));
            self.launched.lock().unwrap().push(job.id.clone());

            let mut pid = self.next_pid.lock().unwrap();
            *pid += 1;

            let (polls_left, code, until_killed) = match exit {
                MockExit::AfterPolls(n, code) => (n, code, false),
                MockExit::UntilKilled => (0, 0, true),
            };
            Ok(Box::new(MockWorker {
                pid: *pid,
                polls_left,
                code,
                killed: false,
                until_killed,
            }))
        }
    }
}
