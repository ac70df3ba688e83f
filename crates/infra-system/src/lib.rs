// Gradekeep Infrastructure - System Adapters
// Implements: WorkerLauncher (process groups), OutcomeSender (HTTP passback)

pub mod launcher;
pub mod outcome;

pub use launcher::SystemWorkerLauncher;
pub use outcome::HttpOutcomeSender;
