// Upload Store Port
//
// Large form values are persisted once and the form carries an opaque
// reference. The worker swaps references back for content before graders
// run, so the queue payload stays small and nothing path-shaped crosses
// the wire.

use crate::port::log_store::StoreError;

/// Key under which a form value marks an upload reference.
pub const UPLOAD_REF_KEY: &str = "__upload__";

/// Key under which an inbound form value carries literal upload content.
/// Intake stores the content and rewrites the value to an `UPLOAD_REF_KEY`
/// reference before the job is enqueued.
pub const UPLOAD_CONTENT_KEY: &str = "__upload_content__";

pub trait UploadStore: Send + Sync {
    /// Persist content, returning its opaque token. Storing the same
    /// content twice returns the same token.
    fn store(&self, content: &[u8]) -> Result<String, StoreError>;

    /// Load content by token.
    fn load(&self, token: &str) -> Result<Vec<u8>, StoreError>;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryUploads {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryUploads {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl UploadStore for InMemoryUploads {
        fn store(&self, content: &[u8]) -> Result<String, StoreError> {
            let mut blobs = self.blobs.lock().unwrap();
            let token = format!("upload-{}", blobs.len() + 1);
            // simple content de-dup for the mock
            for (existing, data) in blobs.iter() {
                if data == content {
                    return Ok(existing.clone());
                }
            }
            blobs.insert(token.clone(), content.to_vec());
            Ok(token)
        }

        fn load(&self, token: &str) -> Result<Vec<u8>, StoreError> {
            let blobs = self.blobs.lock().unwrap();
            blobs
                .get(token)
                .cloned()
                .ok_or_else(|| StoreError::InvalidKey(format!("unknown upload token: {token}")))
        }
    }
}
