// Filesystem Upload Store
//
// Content-addressed: the token is the SHA-256 of the content, stored
// under uploads/<t0t1>/<token>. Identical uploads land on the same file,
// and a token can never be minted for content that was not stored.

use crate::layout::DataRoot;
use gradekeep_core::port::{StoreError, UploadStore};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

pub struct FsUploadStore {
    root: DataRoot,
}

impl FsUploadStore {
    pub fn new(root: DataRoot) -> Self {
        Self { root }
    }

    fn blob_path(&self, token: &str) -> Result<PathBuf, StoreError> {
        if token.len() != 64 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StoreError::InvalidKey(format!(
                "not an upload token: {token:?}"
            )));
        }
        Ok(self.root.uploads().join(&token[..2]).join(token))
    }
}

impl UploadStore for FsUploadStore {
    fn store(&self, content: &[u8]) -> Result<String, StoreError> {
        let token = format!("{:x}", Sha256::digest(content));
        let path = self.blob_path(&token)?;
        if path.exists() {
            return Ok(token);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(token)
    }

    fn load(&self, token: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.blob_path(token)?;
        match fs::read(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::InvalidKey(
                format!("unknown upload token: {token}"),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
