// Gradekeep Infrastructure - SQLite Adapter
// Implements: JobQueue

mod connection;
mod migration;
mod queue;

pub use connection::create_pool;
pub use migration::run_migrations;
pub use queue::SqliteJobQueue;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
