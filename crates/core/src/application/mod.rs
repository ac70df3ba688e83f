// Application Layer - Use Cases and Business Logic

pub mod constants;
pub mod enqueue;
pub mod grading;
pub mod panic_guard;
pub mod recovery;
pub mod shutdown;
pub mod status;
pub mod supervisor;

// Re-exports
pub use enqueue::{EnqueueRequest, EnqueueService};
pub use grading::GradingService;
pub use panic_guard::{execute_guarded, PanicGuardResult};
pub use recovery::requeue_orphaned_jobs;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use status::{StatusEvent, StatusTracker};
pub use supervisor::{Supervisor, SupervisorConfig};
