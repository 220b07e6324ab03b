//! Server process lifecycle: spawn, observe, stop, reap.
//!
//! One supervisor owns every registered server. Each running server has an
//! exit watcher task that owns the `Child` and is the only place a live
//! process transitions to Stopped or Crashed, so a start racing an exit can
//! never observe a half-dead entry. Console output flows through a single
//! bounded channel per server into the shared [`LogBuffer`].

use chrono::Utc;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mineshed_config::{LaunchType, ServerDefinition};

use crate::logs::LogBuffer;
use crate::types::{ProcessEntry, ServerStatus, SupervisorError, SupervisorResult};

/// How long a Starting server may stay silent before it is assumed Running
const READY_GRACE: Duration = Duration::from_secs(2);
/// How long a graceful stop may take before the process is killed outright
const STOP_DEADLINE: Duration = Duration::from_secs(10);
/// Console lines buffered between the pipe readers and the log consumer
const LINE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct ServerEntry {
    definition: ServerDefinition,
    status: ServerStatus,
    pid: Option<u32>,
    started_at: Option<chrono::DateTime<Utc>>,
    exit_code: Option<i32>,
    stop_requested: bool,
    stdin: Option<ChildStdin>,
    /// Bumped on every start; async tasks from earlier runs compare against
    /// it and bail instead of mutating state that no longer belongs to them
    run_seq: u64,
}

impl ServerEntry {
    fn new(definition: ServerDefinition) -> Self {
        Self {
            definition,
            status: ServerStatus::Stopped,
            pid: None,
            started_at: None,
            exit_code: None,
            stop_requested: false,
            stdin: None,
            run_seq: 0,
        }
    }

    fn to_process_entry(&self) -> ProcessEntry {
        ProcessEntry {
            server_id: self.definition.id,
            name: self.definition.name.clone(),
            status: self.status,
            pid: self.pid,
            started_at: self.started_at,
            exit_code: self.exit_code,
        }
    }
}

/// Supervises every registered server process
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    servers: Arc<RwLock<HashMap<Uuid, Arc<Mutex<ServerEntry>>>>>,
    logs: LogBuffer,
    events: watch::Sender<u64>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        let (events, _) = watch::channel(0);
        Self {
            servers: Arc::new(RwLock::new(HashMap::new())),
            logs: LogBuffer::new(),
            events,
        }
    }

    /// Console buffers for all supervised servers
    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    /// Receiver that changes whenever any server's runtime state changes.
    /// The value is a counter; only the edge matters.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.events.subscribe()
    }

    fn notify(&self) {
        self.events.send_modify(|n| *n += 1);
    }

    async fn entry_arc(&self, server_id: Uuid) -> SupervisorResult<Arc<Mutex<ServerEntry>>> {
        let servers = self.servers.read().await;
        servers
            .get(&server_id)
            .cloned()
            .ok_or(SupervisorError::UnknownServer(server_id))
    }

    /// Add a server to the supervision table in the Stopped state
    pub async fn register(&self, definition: ServerDefinition) -> Uuid {
        let id = definition.id;
        let mut servers = self.servers.write().await;
        servers.insert(id, Arc::new(Mutex::new(ServerEntry::new(definition))));
        drop(servers);
        self.notify();
        id
    }

    /// Replace a server's definition. Rejected while its process is live.
    pub async fn update_definition(&self, definition: ServerDefinition) -> SupervisorResult<()> {
        let entry_arc = self.entry_arc(definition.id).await?;
        let mut entry = entry_arc.lock().await;
        if entry.status.is_live() {
            return Err(SupervisorError::DefinitionLocked {
                name: entry.definition.name.clone(),
            });
        }
        entry.definition = definition;
        drop(entry);
        self.notify();
        Ok(())
    }

    /// Remove a server and its console buffer. Rejected while live.
    pub async fn deregister(&self, server_id: Uuid) -> SupervisorResult<ServerDefinition> {
        let entry_arc = self.entry_arc(server_id).await?;
        {
            let entry = entry_arc.lock().await;
            if entry.status.is_live() {
                return Err(SupervisorError::DefinitionLocked {
                    name: entry.definition.name.clone(),
                });
            }
        }
        let mut servers = self.servers.write().await;
        let removed = servers.remove(&server_id);
        drop(servers);
        self.logs.remove(server_id).await;
        self.notify();
        match removed {
            Some(arc) => {
                let entry = arc.lock().await;
                Ok(entry.definition.clone())
            }
            None => Err(SupervisorError::UnknownServer(server_id)),
        }
    }

    pub async fn status(&self, server_id: Uuid) -> SupervisorResult<ServerStatus> {
        let entry_arc = self.entry_arc(server_id).await?;
        let entry = entry_arc.lock().await;
        Ok(entry.status)
    }

    pub async fn process_entry(&self, server_id: Uuid) -> SupervisorResult<ProcessEntry> {
        let entry_arc = self.entry_arc(server_id).await?;
        let entry = entry_arc.lock().await;
        Ok(entry.to_process_entry())
    }

    /// Point-in-time view of every registered server, sorted by name
    pub async fn snapshot(&self) -> Vec<ProcessEntry> {
        let arcs: Vec<Arc<Mutex<ServerEntry>>> = {
            let servers = self.servers.read().await;
            servers.values().cloned().collect()
        };
        let mut entries = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let entry = arc.lock().await;
            entries.push(entry.to_process_entry());
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Spawn a server's process and begin observing it.
    ///
    /// Allowed from Stopped and Crashed. The server enters Starting and is
    /// promoted to Running by its first console line or after a short grace
    /// window, whichever comes first.
    pub async fn start(&self, server_id: Uuid) -> SupervisorResult<u32> {
        let entry_arc = self.entry_arc(server_id).await?;
        let mut entry = entry_arc.lock().await;
        if !entry.status.can_start() {
            return Err(SupervisorError::AlreadyRunning {
                name: entry.definition.name.clone(),
            });
        }

        let definition = entry.definition.clone();
        let mut child = build_command(&definition).spawn().map_err(|source| {
            SupervisorError::LaunchFailed {
                name: definition.name.clone(),
                source,
            }
        })?;

        let pid = child.id().unwrap_or_default();
        entry.run_seq += 1;
        let run = entry.run_seq;
        entry.status = ServerStatus::Starting;
        entry.pid = Some(pid);
        entry.started_at = None;
        entry.exit_code = None;
        entry.stop_requested = false;
        entry.stdin = child.stdin.take();
        drop(entry);

        info!(
            server = %definition.name,
            pid,
            launch_type = definition.launch_type.as_str(),
            "server process spawned"
        );

        if definition.launch_type == LaunchType::JavaConsole {
            let (line_tx, line_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);

            if let Some(stdout) = child.stdout.take() {
                let tx = line_tx.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                });
            }
            if let Some(stderr) = child.stderr.take() {
                let tx = line_tx;
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                });
            }

            // Single consumer keeps sequence numbers in stream order and
            // doubles as the readiness signal
            let supervisor = self.clone();
            let consumer_entry = entry_arc.clone();
            tokio::spawn(async move {
                let mut line_rx = line_rx;
                let mut first = true;
                while let Some(line) = line_rx.recv().await {
                    if first {
                        first = false;
                        supervisor
                            .mark_running(&consumer_entry, run, "first console line")
                            .await;
                    }
                    supervisor.logs.append(server_id, line).await;
                }
            });
        }

        // Grace window: quiet or opaque servers still reach Running
        let supervisor = self.clone();
        let grace_entry = entry_arc.clone();
        tokio::spawn(async move {
            tokio::time::sleep(READY_GRACE).await;
            supervisor
                .mark_running(&grace_entry, run, "startup grace elapsed")
                .await;
        });

        let supervisor = self.clone();
        let watcher_entry = entry_arc;
        tokio::spawn(async move {
            let wait = child.wait().await;
            let mut entry = watcher_entry.lock().await;
            if entry.run_seq != run {
                return;
            }
            let code = wait.as_ref().ok().and_then(|status| status.code());
            let next = if entry.stop_requested || code == Some(0) {
                ServerStatus::Stopped
            } else {
                ServerStatus::Crashed
            };
            match next {
                ServerStatus::Stopped => {
                    info!(server = %entry.definition.name, ?code, "server process exited")
                }
                _ => {
                    error!(server = %entry.definition.name, ?code, "server process crashed")
                }
            }
            entry.status = next;
            entry.exit_code = code;
            entry.pid = None;
            entry.stdin = None;
            drop(entry);
            supervisor.notify();
        });

        self.notify();
        Ok(pid)
    }

    async fn mark_running(&self, entry_arc: &Arc<Mutex<ServerEntry>>, run: u64, reason: &str) {
        let mut entry = entry_arc.lock().await;
        if entry.run_seq != run || entry.status != ServerStatus::Starting {
            return;
        }
        entry.status = ServerStatus::Running;
        entry.started_at = Some(Utc::now());
        info!(server = %entry.definition.name, reason, "server is running");
        drop(entry);
        self.notify();
    }

    /// Ask a live server to shut down on its own terms.
    ///
    /// Console servers get `stop` on stdin; opaque processes get SIGTERM.
    /// Either way a deadline task kills the process if it lingers. Calling
    /// stop on a server that is already Stopping is a no-op.
    pub async fn stop(&self, server_id: Uuid) -> SupervisorResult<()> {
        let entry_arc = self.entry_arc(server_id).await?;
        let mut entry = entry_arc.lock().await;
        if entry.status == ServerStatus::Stopping {
            return Ok(());
        }
        if !entry.status.is_live() {
            return Err(SupervisorError::NotRunning {
                name: entry.definition.name.clone(),
            });
        }

        entry.stop_requested = true;
        entry.status = ServerStatus::Stopping;
        let run = entry.run_seq;
        let name = entry.definition.name.clone();
        info!(server = %name, "stopping server");

        if entry.definition.supports_console() {
            let wrote = match entry.stdin.as_mut() {
                Some(stdin) => {
                    let result = async {
                        stdin.write_all(b"stop\n").await?;
                        stdin.flush().await
                    }
                    .await;
                    result.is_ok()
                }
                None => false,
            };
            if !wrote {
                // Console is gone; fall back to a signal
                warn!(server = %name, "console stop failed, signalling instead");
                if let Some(pid) = entry.pid {
                    terminate(pid);
                }
            }
        } else if let Some(pid) = entry.pid {
            terminate(pid);
        }
        drop(entry);
        self.notify();

        let watchdog_entry = entry_arc;
        tokio::spawn(async move {
            tokio::time::sleep(STOP_DEADLINE).await;
            let entry = watchdog_entry.lock().await;
            if entry.run_seq != run || !entry.status.is_live() {
                return;
            }
            warn!(
                server = %entry.definition.name,
                "graceful stop deadline passed, killing process"
            );
            if let Some(pid) = entry.pid {
                kill_now(pid);
            }
        });

        Ok(())
    }

    /// Kill a live server's process immediately, skipping graceful shutdown.
    /// The escape hatch when a graceful stop does not converge; a no-op on a
    /// server that is already dead.
    pub async fn force_stop(&self, server_id: Uuid) -> SupervisorResult<()> {
        let entry_arc = self.entry_arc(server_id).await?;
        let mut entry = entry_arc.lock().await;
        if !entry.status.is_live() {
            return Ok(());
        }
        entry.stop_requested = true;
        entry.status = ServerStatus::Stopping;
        warn!(server = %entry.definition.name, "force-stopping server");
        if let Some(pid) = entry.pid {
            kill_now(pid);
        }
        drop(entry);
        self.notify();
        Ok(())
    }

    /// Write one console command to a Running server's stdin
    pub async fn send_command(&self, server_id: Uuid, command: &str) -> SupervisorResult<()> {
        let entry_arc = self.entry_arc(server_id).await?;
        let mut entry = entry_arc.lock().await;
        if !entry.definition.supports_console() {
            return Err(SupervisorError::ConsoleUnsupported {
                name: entry.definition.name.clone(),
            });
        }
        if entry.status != ServerStatus::Running {
            return Err(SupervisorError::NotRunning {
                name: entry.definition.name.clone(),
            });
        }
        let name = entry.definition.name.clone();
        match entry.stdin.as_mut() {
            Some(stdin) => {
                stdin.write_all(command.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await?;
                debug!(server = %name, command, "console command sent");
                Ok(())
            }
            None => Err(SupervisorError::NotRunning { name }),
        }
    }
}

fn build_command(definition: &ServerDefinition) -> Command {
    let mut command = Command::new(&definition.launch.program);
    command.current_dir(&definition.working_directory);

    // Heap flags go before -jar and friends
    if definition.launch_type == LaunchType::JavaConsole {
        if let Some(min) = definition.memory_min_mb {
            command.arg(format!("-Xms{min}M"));
        }
        if let Some(max) = definition.memory_max_mb {
            command.arg(format!("-Xmx{max}M"));
        }
    }
    command.args(&definition.launch.args);

    match definition.launch_type {
        LaunchType::JavaConsole => {
            command
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
        LaunchType::OpaqueProcess => {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }
    }
    command
}

#[cfg(unix)]
fn terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(pid, %err, "failed to send SIGTERM");
    }
}

#[cfg(unix)]
fn kill_now(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        warn!(pid, %err, "failed to send SIGKILL");
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32) {
    warn!(pid, "process signalling is not supported on this platform");
}

#[cfg(not(unix))]
fn kill_now(pid: u32) {
    warn!(pid, "process signalling is not supported on this platform");
}
