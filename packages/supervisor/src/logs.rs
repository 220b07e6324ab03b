//! Per-server console buffers: bounded, pausable, filterable.
//!
//! Each server gets a live ring of recent lines plus a bounded overflow
//! region that absorbs output while the viewer is paused, so resuming never
//! silently drops lines. Both tiers evict oldest-first; pause is a bounded
//! delay, not an unbounded queue.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{FilterView, LogLine, SupervisorResult};

/// Live lines retained per server
pub const MAX_LIVE_LINES: usize = 5000;
/// Lines absorbed while paused before the oldest paused lines are dropped
pub const MAX_OVERFLOW_LINES: usize = 2000;

#[derive(Debug, Default)]
struct ServerLog {
    lines: VecDeque<LogLine>,
    overflow: VecDeque<LogLine>,
    paused: bool,
    next_seq: u64,
    dropped_while_paused: u64,
}

/// Buffers console output for every server the supervisor runs
#[derive(Debug, Clone)]
pub struct LogBuffer {
    buffers: Arc<RwLock<HashMap<Uuid, Arc<Mutex<ServerLog>>>>>,
    live_cap: usize,
    overflow_cap: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_caps(MAX_LIVE_LINES, MAX_OVERFLOW_LINES)
    }

    pub fn with_caps(live_cap: usize, overflow_cap: usize) -> Self {
        Self {
            buffers: Arc::new(RwLock::new(HashMap::new())),
            live_cap,
            overflow_cap,
        }
    }

    async fn entry(&self, server_id: Uuid) -> Arc<Mutex<ServerLog>> {
        {
            let buffers = self.buffers.read().await;
            if let Some(entry) = buffers.get(&server_id) {
                return entry.clone();
            }
        }
        let mut buffers = self.buffers.write().await;
        buffers
            .entry(server_id)
            .or_insert_with(|| Arc::new(Mutex::new(ServerLog::default())))
            .clone()
    }

    /// Append one console line, assigning the next sequence number.
    ///
    /// Called only by the server's single reader task, which is what keeps
    /// sequence numbers in stream order.
    pub async fn append(&self, server_id: Uuid, text: impl Into<String>) {
        let entry = self.entry(server_id).await;
        let mut log = entry.lock().await;
        let line = LogLine {
            seq: log.next_seq,
            timestamp: Utc::now(),
            text: text.into(),
        };
        log.next_seq += 1;

        if log.paused {
            log.overflow.push_back(line);
            if log.overflow.len() > self.overflow_cap {
                log.overflow.pop_front();
                log.dropped_while_paused += 1;
            }
        } else {
            log.lines.push_back(line);
            if log.lines.len() > self.live_cap {
                log.lines.pop_front();
            }
        }
    }

    /// Stop advancing the live view; output keeps accumulating in the
    /// bounded overflow region
    pub async fn pause(&self, server_id: Uuid) {
        let entry = self.entry(server_id).await;
        let mut log = entry.lock().await;
        if !log.paused {
            log.paused = true;
            log.dropped_while_paused = 0;
            debug!(%server_id, "log buffer paused");
        }
    }

    /// Reconcile paused output into the live buffer and resume.
    ///
    /// Returns the number of lines carried over. Lines the overflow cap
    /// forced out while paused stay dropped; everything else lands in the
    /// live buffer in sequence order.
    pub async fn resume(&self, server_id: Uuid) -> usize {
        let entry = self.entry(server_id).await;
        let mut log = entry.lock().await;
        if !log.paused {
            return 0;
        }
        log.paused = false;
        let carried = log.overflow.len();
        if log.dropped_while_paused > 0 {
            warn!(
                %server_id,
                dropped = log.dropped_while_paused,
                "overflow cap exceeded while paused, oldest lines dropped"
            );
        }
        while let Some(line) = log.overflow.pop_front() {
            log.lines.push_back(line);
            if log.lines.len() > self.live_cap {
                log.lines.pop_front();
            }
        }
        log.dropped_while_paused = 0;
        carried
    }

    pub async fn is_paused(&self, server_id: Uuid) -> bool {
        let entry = self.entry(server_id).await;
        let log = entry.lock().await;
        log.paused
    }

    /// Clone of the live buffer in sequence order
    pub async fn snapshot(&self, server_id: Uuid) -> Vec<LogLine> {
        let entry = self.entry(server_id).await;
        let log = entry.lock().await;
        log.lines.iter().cloned().collect()
    }

    /// Live lines with a sequence number greater than `after_seq`; the
    /// restartable view the UI tails with
    pub async fn lines_since(&self, server_id: Uuid, after_seq: Option<u64>) -> Vec<LogLine> {
        let entry = self.entry(server_id).await;
        let log = entry.lock().await;
        log.lines
            .iter()
            .filter(|line| after_seq.map_or(true, |seq| line.seq > seq))
            .cloned()
            .collect()
    }

    /// Case-insensitive substring filter over the current live snapshot.
    /// Does not mutate buffer state.
    pub async fn filter(&self, server_id: Uuid, needle: &str) -> FilterView {
        let entry = self.entry(server_id).await;
        let log = entry.lock().await;
        let needle = needle.to_lowercase();
        let total = log.lines.len();
        let lines: Vec<LogLine> = log
            .lines
            .iter()
            .filter(|line| line.text.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        let matched = lines.len();
        FilterView {
            lines,
            matched,
            total,
        }
    }

    /// Write the full live buffer (ignoring any filter) to a new
    /// timestamped file under `dir`, one line per row in sequence order.
    /// The buffer is untouched either way.
    pub async fn export(
        &self,
        server_id: Uuid,
        server_name: &str,
        dir: &Path,
    ) -> SupervisorResult<PathBuf> {
        let snapshot = self.snapshot(server_id).await;

        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let slug: String = server_name
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let path = dir.join(format!("{slug}-{stamp}.log"));

        let mut contents = String::new();
        for line in &snapshot {
            contents.push_str(&line.text);
            contents.push('\n');
        }
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, contents).await?;

        info!(%server_id, path = %path.display(), lines = snapshot.len(), "exported console log");
        Ok(path)
    }

    /// Drop all retained lines; sequence numbering continues where it was
    pub async fn clear(&self, server_id: Uuid) {
        let entry = self.entry(server_id).await;
        let mut log = entry.lock().await;
        log.lines.clear();
        log.overflow.clear();
    }

    /// Forget a server's buffer entirely (on deregistration)
    pub async fn remove(&self, server_id: Uuid) {
        let mut buffers = self.buffers.write().await;
        buffers.remove(&server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sid() -> Uuid {
        Uuid::new_v4()
    }

    #[tokio::test]
    async fn sequence_numbers_are_strictly_increasing_and_gap_free() {
        let logs = LogBuffer::new();
        let id = sid();
        for i in 0..10 {
            logs.append(id, format!("line {i}")).await;
        }
        let snapshot = logs.snapshot(id).await;
        let seqs: Vec<u64> = snapshot.iter().map(|l| l.seq).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn live_cap_evicts_oldest_first_without_reordering() {
        let logs = LogBuffer::with_caps(3, 10);
        let id = sid();
        for i in 0..5 {
            logs.append(id, format!("line {i}")).await;
        }
        let snapshot = logs.snapshot(id).await;
        let texts: Vec<String> = snapshot.iter().map(|l| l.text.clone()).collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(snapshot.first().unwrap().seq, 2);
    }

    #[tokio::test]
    async fn pause_then_resume_delivers_all_lines_in_order() {
        let logs = LogBuffer::new();
        let id = sid();
        logs.append(id, "before").await;
        logs.pause(id).await;
        for i in 0..50 {
            logs.append(id, format!("paused {i}")).await;
        }
        // Live view does not advance while paused
        assert_eq!(logs.snapshot(id).await.len(), 1);

        let carried = logs.resume(id).await;
        assert_eq!(carried, 50);

        let snapshot = logs.snapshot(id).await;
        assert_eq!(snapshot.len(), 51);
        let seqs: Vec<u64> = snapshot.iter().map(|l| l.seq).collect();
        assert_eq!(seqs, (0..51).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn overflow_cap_drops_oldest_paused_lines() {
        let logs = LogBuffer::with_caps(100, 5);
        let id = sid();
        logs.pause(id).await;
        for i in 0..8 {
            logs.append(id, format!("paused {i}")).await;
        }
        logs.resume(id).await;

        let texts: Vec<String> = logs
            .snapshot(id)
            .await
            .iter()
            .map(|l| l.text.clone())
            .collect();
        // The three oldest paused lines were sacrificed, the rest kept order
        assert_eq!(
            texts,
            vec!["paused 3", "paused 4", "paused 5", "paused 6", "paused 7"]
        );
    }

    #[tokio::test]
    async fn filter_reports_matches_and_totals_in_sequence_order() {
        let logs = LogBuffer::new();
        let id = sid();
        for i in 0..97 {
            logs.append(id, format!("info tick {i}")).await;
        }
        logs.append(id, "ERROR: chunk save failed").await;
        logs.append(id, "[Server] error in plugin").await;
        logs.append(id, "An Error occurred").await;

        let view = logs.filter(id, "error").await;
        assert_eq!(view.total, 100);
        assert_eq!(view.matched, 3);
        assert_eq!(view.lines.len(), 3);
        assert!(view.lines.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn lines_since_tails_only_new_lines() {
        let logs = LogBuffer::new();
        let id = sid();
        logs.append(id, "a").await;
        logs.append(id, "b").await;
        let all = logs.lines_since(id, None).await;
        assert_eq!(all.len(), 2);

        logs.append(id, "c").await;
        let new = logs.lines_since(id, Some(all.last().unwrap().seq)).await;
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].text, "c");
    }

    #[tokio::test]
    async fn export_writes_one_line_per_row() {
        let logs = LogBuffer::new();
        let id = sid();
        logs.append(id, "first").await;
        logs.append(id, "second").await;

        let dir = tempfile::tempdir().unwrap();
        let path = logs.export(id, "my server", dir.path()).await.unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "first\nsecond\n");
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("my_server-"));
    }

    #[tokio::test]
    async fn clear_keeps_sequence_numbering() {
        let logs = LogBuffer::new();
        let id = sid();
        logs.append(id, "a").await;
        logs.append(id, "b").await;
        logs.clear(id).await;
        logs.append(id, "c").await;

        let snapshot = logs.snapshot(id).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].seq, 2);
    }
}
