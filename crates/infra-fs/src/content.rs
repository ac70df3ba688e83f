// Filesystem Content Resolver
//
// Page definitions live as content.json files under a content root, one
// directory per path segment:
//
//   <content_root>/<course>/<...>/content.json
//
// The file holds the page's gradable items:
//
//   { "items": [ { "name": "q1", "kind": "number", "points": 2.0,
//                  "config": { ... } } ] }

use async_trait::async_trait;
use gradekeep_core::error::{AppError, Result};
use gradekeep_core::port::{ContentResolver, PageContext};
use std::path::PathBuf;

pub struct FsContentResolver {
    content_root: PathBuf,
}

impl FsContentResolver {
    pub fn new(content_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
        }
    }

    fn page_file(&self, path: &[String]) -> Result<PathBuf> {
        if path.is_empty() {
            return Err(AppError::Validation("content path is empty".to_string()));
        }
        let mut p = self.content_root.clone();
        for segment in path {
            // intake validates these; re-check here because this joins
            // real filesystem paths
            if segment.is_empty()
                || segment.starts_with('.')
                || segment.contains('/')
                || segment.contains('\\')
            {
                return Err(AppError::Validation(format!(
                    "bad content path segment: {segment:?}"
                )));
            }
            p = p.join(segment);
        }
        Ok(p.join("content.json"))
    }
}

#[async_trait]
impl ContentResolver for FsContentResolver {
    async fn resolve(&self, path: &[String]) -> Result<PageContext> {
        let file = self.page_file(path)?;
        let bytes = match std::fs::read(&file) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!(
                    "no page at {}",
                    path.join("/")
                )));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}
