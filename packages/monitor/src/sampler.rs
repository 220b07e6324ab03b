//! Periodic CPU and memory sampling for supervised servers.
//!
//! One `sysinfo::System` lives for the sampler's whole lifetime: CPU
//! percentages are deltas between consecutive refreshes, so throwing the
//! `System` away between samples would report zero forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, System};
use tokio::sync::{watch, Mutex};
use tracing::debug;
use uuid::Uuid;

use mineshed_supervisor::{ProcessEntry, ProcessSupervisor, ServerStatus};

/// Time between samples. Also the floor for meaningful CPU deltas.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Usage of one supervised server at a sample instant.
///
/// Servers without a live process report zero usage rather than vanishing
/// from the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessUsage {
    pub server_id: Uuid,
    pub name: String,
    pub status: ServerStatus,
    pub pid: Option<u32>,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    /// Seconds since the server reached Running; zero otherwise
    pub uptime_secs: u64,
}

/// Whole-machine usage at a sample instant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemUsage {
    pub cpu_percent: f32,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
}

/// One complete sample across the machine and every registered server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub taken_at: DateTime<Utc>,
    pub system: SystemUsage,
    pub processes: Vec<ProcessUsage>,
}

impl Default for MonitorSnapshot {
    fn default() -> Self {
        Self {
            taken_at: Utc::now(),
            system: SystemUsage::default(),
            processes: Vec::new(),
        }
    }
}

/// Samples resource usage for every server the supervisor knows about
pub struct MonitoringSampler {
    supervisor: ProcessSupervisor,
    system: Mutex<System>,
    latest: watch::Sender<MonitorSnapshot>,
}

impl MonitoringSampler {
    pub fn new(supervisor: ProcessSupervisor) -> Self {
        let (latest, _) = watch::channel(MonitorSnapshot::default());
        Self {
            supervisor,
            system: Mutex::new(System::new()),
            latest,
        }
    }

    /// Receiver holding the most recent snapshot
    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.latest.subscribe()
    }

    /// Take one sample now and publish it.
    ///
    /// A server whose process has exited between samples gets zero usage;
    /// its status comes straight from the supervisor.
    pub async fn sample(&self) -> MonitorSnapshot {
        let entries = self.supervisor.snapshot().await;
        let mut system = self.system.lock().await;

        system.refresh_cpu();
        system.refresh_memory();

        let processes: Vec<ProcessUsage> = entries
            .into_iter()
            .map(|entry| usage_for(&mut system, entry))
            .collect();

        let snapshot = MonitorSnapshot {
            taken_at: Utc::now(),
            system: SystemUsage {
                cpu_percent: system.global_cpu_info().cpu_usage(),
                memory_total_bytes: system.total_memory(),
                memory_used_bytes: system.used_memory(),
            },
            processes,
        };
        drop(system);

        self.latest.send_replace(snapshot.clone());
        snapshot
    }

    /// Sample on a fixed cadence until the task is aborted
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot = self.sample().await;
            debug!(
                servers = snapshot.processes.len(),
                cpu = snapshot.system.cpu_percent,
                "resource sample taken"
            );
        }
    }
}

/// Usage row for one supervised server.
///
/// The refresh result decides liveness: when `refresh_process_specifics`
/// reports the pid gone, the previous refresh's numbers for it are never
/// echoed back, even if the exit watcher has not caught up yet.
fn usage_for(system: &mut System, entry: ProcessEntry) -> ProcessUsage {
    let refreshed = entry.pid.map_or(false, |pid| {
        system.refresh_process_specifics(
            Pid::from_u32(pid),
            ProcessRefreshKind::new().with_cpu().with_memory(),
        )
    });
    let process = if refreshed {
        entry.pid.and_then(|pid| system.process(Pid::from_u32(pid)))
    } else {
        None
    };

    let uptime_secs = match (entry.status, entry.started_at) {
        (ServerStatus::Running, Some(started)) => {
            (Utc::now() - started).num_seconds().max(0) as u64
        }
        _ => 0,
    };

    let (cpu_percent, memory_bytes, pid) = match process {
        Some(process) => (process.cpu_usage(), process.memory(), entry.pid),
        None => (0.0, 0, None),
    };
    ProcessUsage {
        server_id: entry.server_id,
        name: entry.name,
        status: entry.status,
        pid,
        cpu_percent,
        memory_bytes,
        uptime_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mineshed_config::{LaunchCommand, LaunchType, ServerDefinition};
    use pretty_assertions::assert_eq;

    fn sleeper(name: &str, dir: &std::path::Path) -> ServerDefinition {
        ServerDefinition::new(
            name,
            dir,
            LaunchCommand::new("sh", vec!["-c".into(), "sleep 30".into()]),
            LaunchType::OpaqueProcess,
        )
    }

    async fn wait_for_status(
        supervisor: &ProcessSupervisor,
        id: Uuid,
        wanted: ServerStatus,
    ) -> ServerStatus {
        for _ in 0..200 {
            let status = supervisor.status(id).await.unwrap();
            if status == wanted {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        supervisor.status(id).await.unwrap()
    }

    #[tokio::test]
    async fn stopped_server_reports_zero_usage() {
        let supervisor = ProcessSupervisor::new();
        let dir = tempfile::tempdir().unwrap();
        let id = supervisor.register(sleeper("idle", dir.path())).await;

        let sampler = MonitoringSampler::new(supervisor);
        let snapshot = sampler.sample().await;

        let usage = snapshot
            .processes
            .iter()
            .find(|p| p.server_id == id)
            .unwrap();
        assert_eq!(usage.status, ServerStatus::Stopped);
        assert_eq!(usage.pid, None);
        assert_eq!(usage.cpu_percent, 0.0);
        assert_eq!(usage.memory_bytes, 0);
        assert_eq!(usage.uptime_secs, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn live_process_reports_real_memory() {
        let supervisor = ProcessSupervisor::new();
        let dir = tempfile::tempdir().unwrap();
        let id = supervisor.register(sleeper("busy", dir.path())).await;
        supervisor.start(id).await.unwrap();
        wait_for_status(&supervisor, id, ServerStatus::Running).await;

        let sampler = MonitoringSampler::new(supervisor.clone());
        let snapshot = sampler.sample().await;
        let usage = snapshot
            .processes
            .iter()
            .find(|p| p.server_id == id)
            .unwrap();
        assert_eq!(usage.status, ServerStatus::Running);
        assert!(usage.pid.is_some());
        assert!(usage.memory_bytes > 0, "a live sleep still has an RSS");
        assert!(snapshot.system.memory_total_bytes > 0);

        // Uptime counts from the moment the server reached Running
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let snapshot = sampler.sample().await;
        let usage = snapshot
            .processes
            .iter()
            .find(|p| p.server_id == id)
            .unwrap();
        assert!(usage.uptime_secs >= 1);

        supervisor.force_stop(id).await.unwrap();
        wait_for_status(&supervisor, id, ServerStatus::Stopped).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_process_drops_to_zero_usage() {
        let supervisor = ProcessSupervisor::new();
        let dir = tempfile::tempdir().unwrap();
        let id = supervisor.register(sleeper("shortlived", dir.path())).await;
        supervisor.start(id).await.unwrap();
        wait_for_status(&supervisor, id, ServerStatus::Running).await;

        let sampler = MonitoringSampler::new(supervisor.clone());
        sampler.sample().await;

        supervisor.force_stop(id).await.unwrap();
        wait_for_status(&supervisor, id, ServerStatus::Stopped).await;

        let snapshot = sampler.sample().await;
        let usage = snapshot
            .processes
            .iter()
            .find(|p| p.server_id == id)
            .unwrap();
        assert_eq!(usage.status, ServerStatus::Stopped);
        assert_eq!(usage.cpu_percent, 0.0);
        assert_eq!(usage.memory_bytes, 0);
        assert_eq!(usage.pid, None);
        assert_eq!(usage.uptime_secs, 0);
    }

    #[cfg(unix)]
    #[test]
    fn dead_pid_is_never_reported_with_stale_usage() {
        // A pid that existed a moment ago but is gone now; the supervisor's
        // exit watcher may not have observed the exit yet
        let mut child = std::process::Command::new("sh")
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let entry = ProcessEntry {
            server_id: Uuid::new_v4(),
            name: "ghost".into(),
            status: ServerStatus::Running,
            pid: Some(pid),
            started_at: Some(Utc::now()),
            exit_code: None,
        };
        let mut system = System::new();
        let usage = usage_for(&mut system, entry);

        assert_eq!(usage.cpu_percent, 0.0);
        assert_eq!(usage.memory_bytes, 0);
        assert_eq!(usage.pid, None);
    }

    #[tokio::test]
    async fn subscribers_get_the_latest_snapshot() {
        let supervisor = ProcessSupervisor::new();
        let sampler = MonitoringSampler::new(supervisor);
        let receiver = sampler.subscribe();

        let taken = sampler.sample().await;
        let seen = receiver.borrow().clone();
        assert_eq!(seen, taken);
    }
}
