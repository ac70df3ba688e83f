// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod naming;
pub mod queue;
pub mod record;

// Re-exports
pub use error::DomainError;
pub use job::{ItemOutcome, Job, JobAction, JobId, JobResult, JobState};
pub use queue::{QueueCounts, QueueSnapshot, RunningEntry};
pub use record::LogValue;
