//! Queue items
//!
//! An `Item` is one fetched payload on its way from a fetch task to an
//! analysis task. Its payload is either the still-unread response stream or
//! a spill file in the cache directory. The memory → disk move happens at
//! most once and only inside the feeder's admission path.
//!
//! `clean` releases everything the item owns and is idempotent. It also runs
//! on drop, so every exit path of a consumer releases the item.

use log::{debug, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncRead;

use super::janitor::Janitor;
use crate::fetch::ByteStream;
use crate::limiter::{LimiterPermit, MemoryGate};

enum Backing {
    Memory(ByteStream),
    Disk { path: PathBuf, file: Option<File> },
    Released,
}

/// One fetched payload, resident in memory or spilled to disk
pub struct Item {
    identity: String,
    declared_size: Option<u64>,
    backing: Backing,
    gate: Arc<MemoryGate>,
    janitor: Janitor,
    /// Queue slot, held while the item is queued
    slot: Option<LimiterPermit>,
    cleaned: bool,
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backing = match &self.backing {
            Backing::Memory(_) => "memory",
            Backing::Disk { .. } => "disk",
            Backing::Released => "released",
        };
        f.debug_struct("Item")
            .field("identity", &self.identity)
            .field("declared_size", &self.declared_size)
            .field("backing", &backing)
            .field("cleaned", &self.cleaned)
            .finish_non_exhaustive()
    }
}

impl Item {
    /// Wrap a freshly fetched, memory-resident payload
    #[must_use]
    pub fn new(
        identity: impl Into<String>,
        declared_size: Option<u64>,
        body: ByteStream,
        gate: Arc<MemoryGate>,
        janitor: Janitor,
    ) -> Self {
        Self {
            identity: identity.into(),
            declared_size,
            backing: Backing::Memory(body),
            gate,
            janitor,
            slot: None,
            cleaned: false,
        }
    }

    #[must_use]
    pub(crate) fn with_slot(mut self, slot: LimiterPermit) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Give the queue slot back once the item has left the queue
    pub(crate) fn release_slot(&mut self) {
        self.slot.take();
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Length declared by the transport, if any
    #[must_use]
    pub fn declared_size(&self) -> Option<u64> {
        self.declared_size
    }

    #[must_use]
    pub fn is_spilled(&self) -> bool {
        matches!(self.backing, Backing::Disk { .. })
    }

    /// Spill file backing this item, if it was moved to disk
    #[must_use]
    pub fn spill_path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Disk { path, .. } => Some(path),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_cleaned(&self) -> bool {
        self.cleaned
    }

    /// Switch to disk backing at `path` and hand back the in-memory stream
    ///
    /// Returns `None` (and leaves the item untouched) if the payload is not
    /// memory-resident.
    pub(crate) fn move_to_disk(&mut self, path: PathBuf) -> Option<ByteStream> {
        if !matches!(self.backing, Backing::Memory(_)) {
            return None;
        }
        match std::mem::replace(&mut self.backing, Backing::Disk { path, file: None }) {
            Backing::Memory(stream) => Some(stream),
            _ => None,
        }
    }

    /// Payload reader for a single read pass
    ///
    /// Disk-backed items open their spill file here; the handle stays with
    /// the item and is closed by `clean`.
    pub async fn get_data(&mut self) -> Option<&mut (dyn AsyncRead + Send + Unpin)> {
        match &mut self.backing {
            Backing::Memory(stream) => Some(&mut **stream),
            Backing::Disk { path, file } => {
                if file.is_none() {
                    match File::open(&*path).await {
                        Ok(opened) => *file = Some(opened),
                        Err(e) => {
                            warn!(
                                "Failed to open spill file {} for {}: {e}",
                                path.display(),
                                self.identity
                            );
                            return None;
                        }
                    }
                }
                file.as_mut()
                    .map(|f| f as &mut (dyn AsyncRead + Send + Unpin))
            }
            Backing::Released => {
                warn!("No payload left for {}", self.identity);
                None
            }
        }
    }

    /// Release the payload, the spill file and the queue slot
    ///
    /// Safe to call any number of times; only the first call does work.
    pub fn clean(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;

        match std::mem::replace(&mut self.backing, Backing::Released) {
            Backing::Memory(stream) => drop(stream),
            Backing::Disk { path, file } => {
                if file.is_some() {
                    debug!(target: "chromafeed::cleanup", "Closing open file {}", path.display());
                }
                drop(file);
                // Blocking unlink; clean() also runs from Drop, possibly on
                // a runtime worker. Only failures go to the janitor.
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        debug!(
                            target: "chromafeed::cleanup",
                            "Deferring removal of {}: {e}",
                            path.display()
                        );
                        self.janitor.submit(path);
                    }
                }
            }
            Backing::Released => {}
        }

        self.slot.take();
        self.gate.check_release();
    }
}

impl Drop for Item {
    fn drop(&mut self) {
        self.clean();
    }
}
