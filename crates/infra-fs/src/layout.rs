// Data Root Layout
//
// Everything the filesystem backend persists lives under one data root:
//
//   queue/staging/    half-written files, renamed into place when whole
//   queue/queued/     waiting jobs, one file, name encodes the sort order
//   queue/running/    claimed jobs, keyed by job id
//   queue/results/    finished jobs, sharded by the id's first two chars
//   logs/             record logs (log_store)
//   uploads/          content-addressed upload blobs
//   _locks/           cross-process lock files

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DataRoot {
    root: PathBuf,
}

impl DataRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory tree. Safe to call on every startup.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            self.staging(),
            self.queued(),
            self.running(),
            self.results(),
            self.logs(),
            self.uploads(),
            self.locks(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn staging(&self) -> PathBuf {
        self.root.join("queue").join("staging")
    }

    pub fn queued(&self) -> PathBuf {
        self.root.join("queue").join("queued")
    }

    pub fn running(&self) -> PathBuf {
        self.root.join("queue").join("running")
    }

    pub fn results(&self) -> PathBuf {
        self.root.join("queue").join("results")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn uploads(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn locks(&self) -> PathBuf {
        self.root.join("_locks")
    }
}

/// Escape one key component for use as a file or directory name.
///
/// Alphanumerics, `-` and `_` pass through; everything else (including a
/// leading dot) becomes `%XX`. Escaping is the last line of defense; the
/// intake layer already rejects separator-shaped input.
pub fn escape_component(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for (i, b) in component.bytes().enumerate() {
        let plain = b.is_ascii_alphanumeric()
            || b == b'-'
            || b == b'_'
            || (b == b'.' && i > 0);
        if plain {
            out.push(b as char);
        } else {
            out.push('%');
            out.push_str(&format!("{b:02X}"));
        }
    }
    if out.is_empty() {
        out.push_str("%00");
    }
    out
}
