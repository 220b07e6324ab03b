//! Mineshed Config - persisted server definitions and saved-command tree
//!
//! This crate owns the JSON configuration aggregate: server definitions, the
//! ordered saved-command tree, and flat UI settings. Loading migrates older
//! schema versions forward; saving is an atomic whole-file replacement.

mod migration;
pub mod store;
pub mod tree;
pub mod types;

// Re-export key types and functions for easier use
pub use store::{default_config_path, ConfigStore, CONFIG_FILE_NAME};
pub use tree::{CommandTree, NewNode, NodeId, NodeKind};
pub use types::{
    Config, ConfigError, ConfigResult, LaunchCommand, LaunchType, ServerDefinition, Settings,
    TreeError, TreeResult, CURRENT_CONFIG_VERSION,
};

/// Version information for the config crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
