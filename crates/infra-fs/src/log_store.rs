// Filesystem Log Store
//
// One file per (subject, path, logname) key under logs/, records framed
// by the codec. Writers serialize on the key's lock file; readers go in
// without the lock and rely on the framing to ignore a torn tail. An
// append repairs a torn tail first (truncate to the valid prefix), so a
// crash mid-write costs at most the record that was being written.

use crate::codec;
use crate::layout::{escape_component, DataRoot};
use crate::lockfile::Lockfile;
use gradekeep_core::domain::LogValue;
use gradekeep_core::port::{LogStore, StoreError, Transform, UpdateMethod};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::warn;

pub struct FsLogStore {
    root: DataRoot,
}

impl FsLogStore {
    pub fn new(root: DataRoot) -> Self {
        Self { root }
    }

    fn log_path(&self, subject: &str, path: &[String], logname: &str) -> PathBuf {
        let mut p = self.root.logs().join(escape_component(subject));
        for segment in path {
            p = p.join(escape_component(segment));
        }
        p.join(format!("{}.log", escape_component(logname)))
    }

    fn lock_path(&self, subject: &str, path: &[String], logname: &str) -> PathBuf {
        let mut p = self.root.locks().join(escape_component(subject));
        for segment in path {
            p = p.join(escape_component(segment));
        }
        p.join(format!("{}.lock", escape_component(logname)))
    }

    fn open_rw(&self, path: &PathBuf) -> Result<File, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    /// Append a frame at the end of the valid prefix, truncating a torn
    /// tail first.
    fn append_frame(file: &mut File, tail: &codec::Tail, frame: &[u8], origin: &str) -> Result<(), StoreError> {
        let file_len = file.metadata()?.len();
        if tail.valid_len < file_len {
            warn!(origin = %origin, "Truncating torn tail before append");
            file.set_len(tail.valid_len)?;
        }
        file.seek(SeekFrom::Start(tail.valid_len))?;
        file.write_all(frame)?;
        Ok(())
    }
}

fn origin_of(subject: &str, path: &[String], logname: &str) -> String {
    format!("{}/{}/{}", subject, path.join("/"), logname)
}

impl LogStore for FsLogStore {
    fn append(
        &self,
        subject: &str,
        path: &[String],
        logname: &str,
        value: &LogValue,
    ) -> Result<(), StoreError> {
        let origin = origin_of(subject, path, logname);
        let frame = codec::encode_record(value)?;
        let _lock = Lockfile::acquire_default(&self.lock_path(subject, path, logname))?;
        let mut file = self.open_rw(&self.log_path(subject, path, logname))?;
        let tail = codec::tail(&mut file, &origin)?;
        Self::append_frame(&mut file, &tail, &frame, &origin)
    }

    fn replace(
        &self,
        subject: &str,
        path: &[String],
        logname: &str,
        value: &LogValue,
    ) -> Result<(), StoreError> {
        let origin = origin_of(subject, path, logname);
        let frame = codec::encode_record(value)?;
        let _lock = Lockfile::acquire_default(&self.lock_path(subject, path, logname))?;

        let path = self.log_path(subject, path, logname);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("log.tmp");
        fs::write(&tmp, &frame)?;
        fs::rename(&tmp, &path).map_err(|e| {
            warn!(origin = %origin, error = %e, "Replace rename failed");
            StoreError::Io(e)
        })
    }

    fn read_all(
        &self,
        subject: &str,
        path: &[String],
        logname: &str,
    ) -> Result<Vec<LogValue>, StoreError> {
        let origin = origin_of(subject, path, logname);
        let mut file = match File::open(self.log_path(subject, path, logname)) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(codec::scan_records(&data, &origin).records)
    }

    fn most_recent(
        &self,
        subject: &str,
        path: &[String],
        logname: &str,
    ) -> Result<Option<LogValue>, StoreError> {
        let origin = origin_of(subject, path, logname);
        let mut file = match File::open(self.log_path(subject, path, logname)) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(codec::tail(&mut file, &origin)?.last.map(|(_, v)| v))
    }

    fn modify_most_recent(
        &self,
        subject: &str,
        path: &[String],
        logname: &str,
        default: &LogValue,
        transform: Transform<'_>,
        method: UpdateMethod,
    ) -> Result<LogValue, StoreError> {
        let origin = origin_of(subject, path, logname);
        let _lock = Lockfile::acquire_default(&self.lock_path(subject, path, logname))?;

        let mut file = self.open_rw(&self.log_path(subject, path, logname))?;
        let tail = codec::tail(&mut file, &origin)?;
        let current = tail
            .last
            .as_ref()
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| default.clone());

        let updated = transform(current)?;
        let frame = codec::encode_record(&updated)?;
        match method {
            UpdateMethod::Append => {
                Self::append_frame(&mut file, &tail, &frame, &origin)?;
            }
            UpdateMethod::Overwrite => {
                // rewind over the record being replaced (and any torn
                // tail past it)
                let keep = tail.last.as_ref().map(|(start, _)| *start).unwrap_or(0);
                file.set_len(keep)?;
                file.seek(SeekFrom::Start(keep))?;
                file.write_all(&frame)?;
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn store() -> (tempfile::TempDir, FsLogStore) {
        let dir = tempfile::tempdir().unwrap();
        let root = DataRoot::new(dir.path());
        root.ensure().unwrap();
        (dir, FsLogStore::new(root))
    }

    fn path() -> Vec<String> {
        vec!["spring24".to_string(), "ps0".to_string()]
    }

    #[test]
    fn test_append_and_read_all_in_order() {
        let (_dir, store) = store();
        for n in 0..3 {
            store
                .append("alice", &path(), "problems", &LogValue::Int(n))
                .unwrap();
        }
        let all = store.read_all("alice", &path(), "problems").unwrap();
        assert_eq!(
            all,
            vec![LogValue::Int(0), LogValue::Int(1), LogValue::Int(2)]
        );
    }

    #[test]
    fn test_most_recent_is_last_append() {
        let (_dir, store) = store();
        store
            .append("alice", &path(), "problems", &LogValue::Int(1))
            .unwrap();
        store
            .append("alice", &path(), "problems", &LogValue::Int(2))
            .unwrap();
        assert_eq!(
            store.most_recent("alice", &path(), "problems").unwrap(),
            Some(LogValue::Int(2))
        );
    }

    #[test]
    fn test_missing_log_reads_empty() {
        let (_dir, store) = store();
        assert!(store.read_all("nobody", &path(), "problems").unwrap().is_empty());
        assert_eq!(store.most_recent("nobody", &path(), "problems").unwrap(), None);
    }

    #[test]
    fn test_replace_resets_to_one_record() {
        let (_dir, store) = store();
        for n in 0..5 {
            store
                .append("alice", &path(), "problems", &LogValue::Int(n))
                .unwrap();
        }
        store
            .replace("alice", &path(), "problems", &LogValue::Int(99))
            .unwrap();
        assert_eq!(
            store.read_all("alice", &path(), "problems").unwrap(),
            vec![LogValue::Int(99)]
        );
    }

    #[test]
    fn test_modify_overwrite_keeps_log_length() {
        let (_dir, store) = store();
        store
            .append("alice", &path(), "state", &LogValue::Int(1))
            .unwrap();
        store
            .append("alice", &path(), "state", &LogValue::Int(2))
            .unwrap();

        let written = store
            .modify_most_recent(
                "alice",
                &path(),
                "state",
                &LogValue::Int(0),
                Box::new(|v| {
                    let n = v.as_f64().unwrap_or(0.0) as i64;
                    Ok(LogValue::Int(n * 10))
                }),
                UpdateMethod::Overwrite,
            )
            .unwrap();
        assert_eq!(written, LogValue::Int(20));

        let all = store.read_all("alice", &path(), "state").unwrap();
        assert_eq!(all, vec![LogValue::Int(1), LogValue::Int(20)]);
    }

    #[test]
    fn test_modify_append_grows_log() {
        let (_dir, store) = store();
        store
            .append("alice", &path(), "state", &LogValue::Int(1))
            .unwrap();
        store
            .modify_most_recent(
                "alice",
                &path(),
                "state",
                &LogValue::Int(0),
                Box::new(|_| Ok(LogValue::Int(2))),
                UpdateMethod::Append,
            )
            .unwrap();
        let all = store.read_all("alice", &path(), "state").unwrap();
        assert_eq!(all, vec![LogValue::Int(1), LogValue::Int(2)]);
    }

    #[test]
    fn test_modify_empty_log_sees_default() {
        let (_dir, store) = store();
        let written = store
            .modify_most_recent(
                "alice",
                &path(),
                "state",
                &LogValue::Map(BTreeMap::new()),
                Box::new(|v| {
                    let mut m = v.into_map().unwrap_or_default();
                    m.insert("seen".to_string(), LogValue::Bool(true));
                    Ok(LogValue::Map(m))
                }),
                UpdateMethod::Overwrite,
            )
            .unwrap();
        let m = written.as_map().unwrap();
        assert_eq!(m.get("seen"), Some(&LogValue::Bool(true)));
        assert_eq!(store.read_all("alice", &path(), "state").unwrap().len(), 1);
    }

    #[test]
    fn test_torn_tail_repaired_on_next_append() {
        let (_dir, store) = store();
        store
            .append("alice", &path(), "state", &LogValue::Int(1))
            .unwrap();

        // crash mid-write: raw garbage lands after the valid record
        let log = store.log_path("alice", &path(), "state");
        let mut f = OpenOptions::new().append(true).open(&log).unwrap();
        f.write_all(b"half a record").unwrap();
        drop(f);

        assert_eq!(
            store.most_recent("alice", &path(), "state").unwrap(),
            Some(LogValue::Int(1))
        );

        store
            .append("alice", &path(), "state", &LogValue::Int(2))
            .unwrap();
        let all = store.read_all("alice", &path(), "state").unwrap();
        assert_eq!(all, vec![LogValue::Int(1), LogValue::Int(2)]);
    }

    #[test]
    fn test_concurrent_modify_loses_no_updates() {
        let (_dir, store) = store();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    store
                        .modify_most_recent(
                            "alice",
                            &[
                                "spring24".to_string(),
                                "ps0".to_string(),
                            ],
                            "counter",
                            &LogValue::Int(0),
                            Box::new(|v| {
                                let n = match v {
                                    LogValue::Int(n) => n,
                                    _ => 0,
                                };
                                Ok(LogValue::Int(n + 1))
                            }),
                            UpdateMethod::Overwrite,
                        )
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(
            store
                .most_recent(
                    "alice",
                    &["spring24".to_string(), "ps0".to_string()],
                    "counter"
                )
                .unwrap(),
            Some(LogValue::Int(100))
        );
    }

    #[test]
    fn test_hostile_key_components_stay_inside_root() {
        let (dir, store) = store();
        store
            .append(
                "../escape",
                &["a/b".to_string()],
                "log",
                &LogValue::Int(1),
            )
            .unwrap();
        // nothing was written outside the data root
        assert!(!dir.path().parent().unwrap().join("escape").exists());
        assert_eq!(
            store
                .most_recent("../escape", &["a/b".to_string()], "log")
                .unwrap(),
            Some(LogValue::Int(1))
        );
    }
}
