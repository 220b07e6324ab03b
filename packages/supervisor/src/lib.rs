//! Mineshed Supervisor - game-server process lifecycle and console capture
//!
//! Spawns configured server processes, tracks their lifecycle through a
//! small state machine, streams their console output into bounded per-server
//! buffers, and shuts them down gracefully with a hard deadline.

pub mod logs;
pub mod supervisor;
pub mod types;

// Re-export key types and functions for easier use
pub use logs::{LogBuffer, MAX_LIVE_LINES, MAX_OVERFLOW_LINES};
pub use supervisor::ProcessSupervisor;
pub use types::{
    FilterView, LogLine, ProcessEntry, ServerStatus, SupervisorError, SupervisorResult,
};

/// Version information for the supervisor crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
