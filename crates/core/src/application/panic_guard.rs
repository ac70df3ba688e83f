// Panic isolation around grader calls
//
// A panicking grader must cost exactly one item, not the worker process.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed (the inner value may still be an Err)
    Success(T),
    /// Execution panicked; payload is the panic message
    Panicked(String),
}

/// Run a closure, converting a panic into a value.
///
/// Graders are third-party code behind a trait object; the unwind-safety
/// assertion is ours because nothing of the worker's state is reused after
/// a caught panic.
pub fn execute_guarded<F, T>(f: F) -> PanicGuardResult<T>
where
    F: FnOnce() -> T,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => PanicGuardResult::Success(result),
        Err(panic_info) => {
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            error!(panic_msg = %panic_msg, "Grader panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}
