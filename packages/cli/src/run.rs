//! Foreground run mode: start servers, stream their consoles, and wind
//! everything down on Ctrl-C.

use anyhow::{bail, Context};
use colored::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use mineshed_config::{ConfigStore, ServerDefinition};
use mineshed_monitor::MonitoringSampler;
use mineshed_supervisor::ProcessSupervisor;

/// How often the console streamer polls for new lines
const TAIL_INTERVAL: Duration = Duration::from_millis(200);
/// Total time allowed for graceful shutdown before stragglers are killed
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(12);

pub async fn run(config_path: &Path, names: Vec<String>) -> anyhow::Result<()> {
    let config = ConfigStore::new(config_path)
        .load()
        .with_context(|| format!("loading {}", config_path.display()))?;

    let selected: Vec<ServerDefinition> = if names.is_empty() {
        config.servers.clone()
    } else {
        names
            .iter()
            .map(|name| match config.server_by_name(name) {
                Some(server) => Ok(server.clone()),
                None => bail!("no server named '{name}' in {}", config_path.display()),
            })
            .collect::<anyhow::Result<_>>()?
    };
    if selected.is_empty() {
        bail!("no servers configured in {}", config_path.display());
    }

    let supervisor = ProcessSupervisor::new();
    let mut ids: Vec<(Uuid, String)> = Vec::with_capacity(selected.len());
    for definition in selected {
        let name = definition.name.clone();
        let id = supervisor.register(definition).await;
        ids.push((id, name));
    }

    let sampler = Arc::new(MonitoringSampler::new(supervisor.clone()));
    let monitor_handle = tokio::spawn(Arc::clone(&sampler).run());

    for (id, name) in &ids {
        let pid = supervisor.start(*id).await?;
        println!("{} {} (pid {})", "▶".green(), name.bold(), pid);
    }

    let mut tail_handles = Vec::with_capacity(ids.len());
    for (id, name) in &ids {
        let supervisor = supervisor.clone();
        let id = *id;
        let name = name.clone();
        tail_handles.push(tokio::spawn(async move {
            let tag = format!("[{name}]");
            let mut last_seq = None;
            loop {
                for line in supervisor.logs().lines_since(id, last_seq).await {
                    println!("{} {}", tag.cyan(), line.text);
                    last_seq = Some(line.seq);
                }
                tokio::time::sleep(TAIL_INTERVAL).await;
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    println!("\n{}", "Stopping all servers...".yellow().bold());

    for (id, name) in &ids {
        if let Err(err) = supervisor.stop(*id).await {
            // Already exited on its own is fine here
            warn!(server = %name, %err, "graceful stop not issued");
        }
    }

    let deadline = Instant::now() + SHUTDOWN_DEADLINE;
    loop {
        let live: Vec<_> = supervisor
            .snapshot()
            .await
            .into_iter()
            .filter(|entry| entry.status.is_live())
            .collect();
        if live.is_empty() {
            break;
        }
        if Instant::now() >= deadline {
            for entry in live {
                println!("{} killing {}", "✖".red(), entry.name.bold());
                let _ = supervisor.force_stop(entry.server_id).await;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for handle in tail_handles {
        handle.abort();
    }
    monitor_handle.abort();
    println!("{} all servers stopped", "✅".green());
    Ok(())
}
