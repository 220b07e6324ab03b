//! Mineshed Monitor - CPU and memory sampling for supervised servers
//!
//! Polls `sysinfo` on a fixed cadence and publishes per-server and
//! whole-machine usage snapshots over a watch channel.

pub mod sampler;

// Re-export key types and functions for easier use
pub use sampler::{
    MonitorSnapshot, MonitoringSampler, ProcessUsage, SystemUsage, SAMPLE_INTERVAL,
};

/// Version information for the monitor crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
