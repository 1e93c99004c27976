//! Deferred temp-file removal
//!
//! Some platforms release file locks lazily, so deleting a spill file right
//! after closing it can fail. Failed paths are handed to a single janitor
//! task that retries a bounded number of times and then gives up with an
//! explicit log line.

use log::{debug, info, warn};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Outcome counters for one janitor run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JanitorStats {
    /// Paths removed on a retry
    pub removed: u64,
    /// Paths that had vanished before a retry got to them
    pub vanished: u64,
    /// Paths left on disk after the last attempt
    pub abandoned: u64,
}

/// Submission side of the cleanup queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Janitor {
    tx: mpsc::UnboundedSender<PathBuf>,
}

impl Janitor {
    /// Start the janitor task
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(attempts: u32, delay: Duration) -> (Self, JanitorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(janitor_loop(rx, shutdown_rx, attempts.max(1), delay));
        (
            Self { tx },
            JanitorHandle {
                shutdown: shutdown_tx,
                task,
            },
        )
    }

    /// Queue `path` for delayed removal
    pub fn submit(&self, path: PathBuf) {
        if let Err(rejected) = self.tx.send(path) {
            warn!(
                target: "chromafeed::cleanup",
                "Janitor already stopped, abandoning temp file {}",
                rejected.0.display()
            );
        }
    }
}

/// Owner side of the janitor task
#[derive(Debug)]
pub struct JanitorHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<JanitorStats>,
}

impl JanitorHandle {
    /// Stop accepting new paths, finish the queued ones, and report
    pub async fn shutdown(self) -> JanitorStats {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(target: "chromafeed::cleanup", "Janitor task failed: {e}");
                JanitorStats::default()
            }
        }
    }
}

async fn janitor_loop(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    mut shutdown: oneshot::Receiver<()>,
    attempts: u32,
    delay: Duration,
) -> JanitorStats {
    let mut stats = JanitorStats::default();
    let mut closing = false;

    loop {
        let path = if closing {
            rx.recv().await
        } else {
            tokio::select! {
                path = rx.recv() => path,
                _ = &mut shutdown => {
                    // Buffered paths are still delivered after close()
                    rx.close();
                    closing = true;
                    continue;
                }
            }
        };
        let Some(path) = path else {
            break;
        };
        retry_remove(path, attempts, delay, &mut stats).await;
    }

    if stats != JanitorStats::default() {
        info!(
            target: "chromafeed::cleanup",
            "Janitor finished: {} removed, {} vanished, {} abandoned",
            stats.removed, stats.vanished, stats.abandoned
        );
    }
    stats
}

async fn retry_remove(path: PathBuf, attempts: u32, delay: Duration, stats: &mut JanitorStats) {
    for attempt in 1..=attempts {
        tokio::time::sleep(delay).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(
                    target: "chromafeed::cleanup",
                    "Removed {} on retry {attempt}",
                    path.display()
                );
                stats.removed += 1;
                return;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                stats.vanished += 1;
                return;
            }
            Err(e) if attempt == attempts => {
                warn!(
                    target: "chromafeed::cleanup",
                    "Abandoning temp file {} after {attempts} attempts: {e}",
                    path.display()
                );
                stats.abandoned += 1;
            }
            Err(e) => {
                debug!(
                    target: "chromafeed::cleanup",
                    "Retry {attempt}/{attempts} failed for {}: {e}",
                    path.display()
                );
            }
        }
    }
}
