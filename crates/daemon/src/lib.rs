// Gradekeep Daemon - Shared Wiring
//
// Both binaries (gradekeepd and gradekeep-worker) are thin composition
// roots over these modules, so they always agree on configuration, the
// queue backend, and the grader set.

pub mod config;
pub mod graders;
pub mod logging;
pub mod queue;
pub mod telemetry;
