// Cross-Process Lock Files
//
// One lock per log key. `create_new` gives the atomic create-or-fail;
// holders write their pid for postmortems. A lock left behind by a dead
// process is stolen once its mtime is old enough, so one crash cannot
// wedge a key forever.

use gradekeep_core::application::constants::{LOCK_ACQUIRE_TIMEOUT, LOCK_RETRY_INTERVAL};
use gradekeep_core::port::StoreError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::warn;

/// A lock older than this is presumed dead and stolen.
const STALE_AGE: Duration = Duration::from_secs(2 * LOCK_ACQUIRE_TIMEOUT.as_secs());

/// A held lock file; released on drop.
#[derive(Debug)]
pub struct Lockfile {
    path: PathBuf,
}

impl Lockfile {
    /// Acquire the lock at `path`, retrying until `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(path) {
                        warn!(lock = %path.display(), "Stealing stale lock");
                        let _ = fs::remove_file(path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(StoreError::LockTimeout(path.display().to_string()));
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Acquire with the default timeout.
    pub fn acquire_default(path: &Path) -> Result<Self, StoreError> {
        Self::acquire(path, LOCK_ACQUIRE_TIMEOUT)
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .map(|age| age >= STALE_AGE)
        .unwrap_or(false)
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.lock");
        {
            let _lock = Lockfile::acquire(&path, Duration::from_millis(100)).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_held_lock_times_out_second_acquirer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.lock");
        let _held = Lockfile::acquire(&path, Duration::from_millis(100)).unwrap();

        let err = Lockfile::acquire(&path, Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
    }

    #[test]
    fn test_reacquire_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.lock");
        drop(Lockfile::acquire(&path, Duration::from_millis(100)).unwrap());
        let _second = Lockfile::acquire(&path, Duration::from_millis(100)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("k.lock");
        let _lock = Lockfile::acquire(&path, Duration::from_millis(100)).unwrap();
        assert!(path.exists());
    }
}
