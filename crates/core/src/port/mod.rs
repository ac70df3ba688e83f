// Port Layer - Interfaces for external dependencies

pub mod content;
pub mod grader;
pub mod id_provider; // For deterministic testing
pub mod job_queue;
pub mod log_store;
pub mod outcome;
pub mod time_provider;
pub mod uploads;
pub mod worker_launcher;

// Re-exports
pub use content::{ContentResolver, ItemSpec, PageContext};
pub use grader::{GradeOutcome, Grader, GraderRegistry};
pub use id_provider::{IdProvider, SequentialIdProvider, UuidProvider};
pub use job_queue::JobQueue;
pub use log_store::{LogStore, StoreError, Transform, UpdateMethod};
pub use outcome::OutcomeSender;
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use uploads::{UploadStore, UPLOAD_CONTENT_KEY, UPLOAD_REF_KEY};
pub use worker_launcher::{LaunchError, WorkerExit, WorkerLauncher, WorkerProcess};
