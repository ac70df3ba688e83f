// System Worker Launcher
//
// One claimed job = one `gradekeep-worker <job-id>` OS process. Before exec
// the child detaches into its own session, which also gives it its own
// process group: `kill_group` then reaches anything a grader spawned
// underneath it. On Linux the child additionally asks the kernel for SIGKILL
// should the daemon die first, so workers never outlive their supervisor.

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::{info, warn};

use gradekeep_core::domain::Job;
use gradekeep_core::port::worker_launcher::{
    LaunchError, WorkerExit, WorkerLauncher, WorkerProcess,
};

/// Spawns worker processes, one per claimed job.
pub struct SystemWorkerLauncher {
    worker_bin: PathBuf,
    env: Vec<(String, String)>,
}

impl SystemWorkerLauncher {
    pub fn new(worker_bin: impl Into<PathBuf>) -> Self {
        Self {
            worker_bin: worker_bin.into(),
            env: Vec::new(),
        }
    }

    /// Extra environment passed to every worker on top of the inherited one.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl WorkerLauncher for SystemWorkerLauncher {
    fn launch(&self, job: &Job) -> Result<Box<dyn WorkerProcess>, LaunchError> {
        let mut cmd = Command::new(&self.worker_bin);
        cmd.arg(&job.id).stdin(Stdio::null());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        detach_into_own_group(&mut cmd);

        let child = cmd.spawn().map_err(|e| {
            LaunchError::SpawnFailed(format!("{}: {}", self.worker_bin.display(), e))
        })?;
        let pid = child.id() as i32;

        info!(job_id = %job.id, pid = %pid, "Worker process launched");

        Ok(Box::new(SpawnedWorker {
            child,
            pid,
            exit: None,
        }))
    }
}

#[cfg(unix)]
fn detach_into_own_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // Runs in the child between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(io::Error::from)?;
            #[cfg(target_os = "linux")]
            nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGKILL)
                .map_err(io::Error::from)?;
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach_into_own_group(_cmd: &mut Command) {}

/// Handle to one spawned worker. The exit status is cached after the first
/// successful reap so later polls stay cheap.
#[derive(Debug)]
struct SpawnedWorker {
    child: Child,
    pid: i32,
    exit: Option<WorkerExit>,
}

impl WorkerProcess for SpawnedWorker {
    fn pid(&self) -> i32 {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<WorkerExit>, LaunchError> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let exit = exit_from_status(status);
                self.exit = Some(exit);
                Ok(Some(exit))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(LaunchError::Io(e)),
        }
    }

    fn kill_group(&mut self) -> Result<(), LaunchError> {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            // setsid in the child makes its pgid equal its pid.
            match killpg(Pid::from_raw(self.pid), Signal::SIGKILL) {
                Ok(()) => Ok(()),
                // Whole group already gone.
                Err(Errno::ESRCH) => Ok(()),
                Err(e) => {
                    warn!(pid = %self.pid, error = %e, "killpg failed");
                    Err(LaunchError::SignalFailed(e.to_string()))
                }
            }
        }
        #[cfg(not(unix))]
        {
            match self.child.kill() {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
                Err(e) => Err(LaunchError::Io(e)),
            }
        }
    }
}

fn exit_from_status(status: ExitStatus) -> WorkerExit {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    WorkerExit {
        code: status.code(),
        signal,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn script_launcher(dir: &TempDir, body: &str) -> SystemWorkerLauncher {
        let path = dir.path().join("worker.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        SystemWorkerLauncher::new(path)
    }

    fn poll_until_exit(worker: &mut Box<dyn WorkerProcess>) -> WorkerExit {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(exit) = worker.try_wait().unwrap() {
                return exit;
            }
            assert!(Instant::now() < deadline, "worker did not exit in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_exit_code_is_reaped() {
        let dir = TempDir::new().unwrap();
        let launcher = script_launcher(&dir, "exit 3");
        let job = Job::new_test(&["course", "ps0"], "alice", &["q1"]);

        let mut worker = launcher.launch(&job).unwrap();
        let exit = poll_until_exit(&mut worker);

        assert_eq!(exit.code, Some(3));
        assert_eq!(exit.signal, None);
        assert!(!exit.clean());
        // reap result is cached
        assert_eq!(worker.try_wait().unwrap(), Some(exit));
    }

    #[test]
    fn test_kill_group_reports_signal() {
        let dir = TempDir::new().unwrap();
        let launcher = script_launcher(&dir, "sleep 30");
        let job = Job::new_test(&["course", "ps0"], "alice", &["q1"]);

        let mut worker = launcher.launch(&job).unwrap();
        worker.kill_group().unwrap();
        let exit = poll_until_exit(&mut worker);

        assert!(exit.was_signaled());
        assert_eq!(exit.signal, Some(9));
    }

    #[test]
    fn test_kill_group_after_exit_is_ok() {
        let dir = TempDir::new().unwrap();
        let launcher = script_launcher(&dir, "exit 0");
        let job = Job::new_test(&["course", "ps0"], "alice", &["q1"]);

        let mut worker = launcher.launch(&job).unwrap();
        let exit = poll_until_exit(&mut worker);
        assert!(exit.clean());

        // group is gone; ESRCH must not surface
        worker.kill_group().unwrap();
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let launcher = SystemWorkerLauncher::new("/nonexistent/gradekeep-worker");
        let job = Job::new_test(&["course", "ps0"], "alice", &["q1"]);

        let err = launcher.launch(&job).unwrap_err();
        assert!(matches!(err, LaunchError::SpawnFailed(_)));
    }

    #[test]
    fn test_env_reaches_worker() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("seen");
        let launcher = script_launcher(
            &dir,
            &format!("printf '%s' \"$GRADEKEEP_DATA_ROOT\" > {}", marker.display()),
        )
        .with_env("GRADEKEEP_DATA_ROOT", "/tmp/grading");
        let job = Job::new_test(&["course", "ps0"], "alice", &["q1"]);

        let mut worker = launcher.launch(&job).unwrap();
        poll_until_exit(&mut worker);

        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "/tmp/grading");
    }
}
