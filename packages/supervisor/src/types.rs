use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a supervised server process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Crashed => "crashed",
        }
    }

    /// States from which `start` is permitted
    pub fn can_start(&self) -> bool {
        matches!(self, ServerStatus::Stopped | ServerStatus::Crashed)
    }

    /// States in which an OS process exists for this server
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ServerStatus::Starting | ServerStatus::Running | ServerStatus::Stopping
        )
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of one server's runtime state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub server_id: Uuid,
    pub name: String,
    pub status: ServerStatus,
    /// Present iff the status is live (Starting/Running/Stopping)
    pub pid: Option<u32>,
    /// Set when the process reached Running
    pub started_at: Option<DateTime<Utc>>,
    /// Exit code of the most recent run, once the exit watcher has observed it
    pub exit_code: Option<i32>,
}

/// One captured console line. Append-only; sequence numbers are strictly
/// increasing per server and assigned exactly once, in stream order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Result of a case-insensitive substring filter over a buffer snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterView {
    /// Matching lines in original sequence order
    pub lines: Vec<LogLine>,
    pub matched: usize,
    pub total: usize,
}

/// Error types for supervisor operations
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("no server registered with id {0}")]
    UnknownServer(Uuid),

    #[error("server '{name}' is already running")]
    AlreadyRunning { name: String },

    #[error("server '{name}' is not running")]
    NotRunning { name: String },

    #[error("failed to launch '{name}': {source}")]
    LaunchFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server '{name}' does not accept console commands")]
    ConsoleUnsupported { name: String },

    #[error("definition for '{name}' can only be edited while stopped")]
    DefinitionLocked { name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for supervisor operations
pub type SupervisorResult<T> = Result<T, SupervisorError>;
