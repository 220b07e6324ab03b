use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::tree::CommandTree;

/// Config schema version written by this build.
///
/// Version 4 is the first to persist the saved-command tree in nested form
/// with explicit `order` values; earlier versions stored a flat command list
/// and are migrated on load.
pub const CURRENT_CONFIG_VERSION: u32 = 4;

/// How a server's child process is launched and observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchType {
    /// Line-oriented interactive console (a Java game server); stdout is
    /// parsed line-by-line and stdin accepts console commands.
    JavaConsole,
    /// Output is not parsed; only lifecycle, PID and resource usage are tracked.
    OpaqueProcess,
}

impl LaunchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchType::JavaConsole => "java_console",
            LaunchType::OpaqueProcess => "opaque_process",
        }
    }
}

/// Executable plus arguments, launched directly with no shell interpretation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// A configured server. Immutable while its process is running; the
/// supervisor rejects definition edits outside Stopped/Crashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub id: Uuid,
    pub name: String,
    pub working_directory: PathBuf,
    pub launch: LaunchCommand,
    pub launch_type: LaunchType,
    /// JVM heap floor in MiB, injected as -Xms for JavaConsole launches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_min_mb: Option<u32>,
    /// JVM heap ceiling in MiB, injected as -Xmx for JavaConsole launches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_max_mb: Option<u32>,
}

impl ServerDefinition {
    pub fn new(
        name: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        launch: LaunchCommand,
        launch_type: LaunchType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            working_directory: working_directory.into(),
            launch,
            launch_type,
            memory_min_mb: None,
            memory_max_mb: None,
        }
    }

    /// Whether this server accepts console input on stdin
    pub fn supports_console(&self) -> bool {
        self.launch_type == LaunchType::JavaConsole
    }
}

/// Flat key/value preferences the UI layer reads and writes through the store
pub type Settings = BTreeMap<String, serde_json::Value>;

/// Top-level persisted aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    #[serde(default)]
    pub servers: Vec<ServerDefinition>,
    #[serde(default)]
    pub saved_commands: CommandTree,
    #[serde(default)]
    pub settings: Settings,
}

impl Config {
    /// Empty config at the current schema version
    pub fn empty() -> Self {
        Self {
            version: CURRENT_CONFIG_VERSION,
            servers: Vec::new(),
            saved_commands: CommandTree::new(),
            settings: Settings::new(),
        }
    }

    pub fn server(&self, id: Uuid) -> Option<&ServerDefinition> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn server_by_name(&self, name: &str) -> Option<&ServerDefinition> {
        self.servers.iter().find(|s| s.name == name)
    }
}

/// Error types for config persistence
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("config file is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error types for saved-command tree mutations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("command node not found: {0}")]
    NotFound(String),

    #[error("cannot move a category into itself or one of its descendants")]
    CycleRejected,

    #[error("node {0} is a command and cannot hold children")]
    NotACategory(String),

    #[error("position {position} is out of bounds for {len} siblings")]
    PositionOutOfBounds { position: usize, len: usize },
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for tree operations
pub type TreeResult<T> = Result<T, TreeError>;
