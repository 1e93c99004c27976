//! Feeder: identity list → fetched items in a two-tier queue
//!
//! Reads identities line by line, runs one fetch task per identity under the
//! fetch limiter, and admits successful fetches into the hot tier (memory)
//! or, once that is full, spills them into the cold tier (disk). Consumers
//! pull with [`Feeder::get`], which waits while the queue is empty and
//! returns `None` only after every fetch task has finished.
//!
//! Both tiers pop LIFO and the hot tier always drains first.
//!
//! Dispatch takes a queue slot before fetching and the item gives it back
//! when it leaves the queue. With `hot + cold` slots, dispatch blocks once
//! both tiers are full instead of growing the cold tier past its capacity.

use log::{debug, info, warn};
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use super::history::DedupHistory;
use super::item::Item;
use super::janitor::Janitor;
use super::spill::{SpillError, spill};
use crate::config::PipelineConfig;
use crate::fetch::Fetcher;
use crate::limiter::{CountingLimiter, LimiterPermit, MemoryGate};
use crate::pipeline::PipelineError;

#[derive(Default)]
struct Tiers {
    hot: Vec<Item>,
    cold: Vec<Item>,
}

#[derive(Debug, Default)]
struct FeederCounters {
    dispatched: AtomicU64,
    duplicates: AtomicU64,
    fetch_failures: AtomicU64,
    undecodable: AtomicU64,
    admitted_hot: AtomicU64,
    admitted_cold: AtomicU64,
    spill_failures: AtomicU64,
    spill_mismatches: AtomicU64,
    spilled_bytes: AtomicU64,
}

/// Snapshot of feeder activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeederStats {
    /// Non-blank identities handed to a fetch task
    pub dispatched: u64,
    pub duplicates: u64,
    /// Transport errors and non-success statuses
    pub fetch_failures: u64,
    /// Input lines skipped because they were not valid UTF-8
    pub undecodable: u64,
    pub admitted_hot: u64,
    pub admitted_cold: u64,
    /// Items lost while copying their payload to disk
    pub spill_failures: u64,
    pub spill_mismatches: u64,
    pub spilled_bytes: u64,
    pub queued_hot: usize,
    pub queued_cold: usize,
}

/// Producer side of the pipeline
pub struct Feeder {
    cache_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    gate: Arc<MemoryGate>,
    janitor: Janitor,
    history: DedupHistory,

    fetch_slots: Arc<CountingLimiter>,
    queue_slots: Arc<CountingLimiter>,
    hot_capacity: usize,
    cold_capacity: usize,

    tiers: Mutex<Tiers>,
    /// Fired after every fetch task and on the terminal signal
    changed: Notify,
    terminal: AtomicBool,
    /// Completion barrier over all dispatched fetch tasks
    tracker: TaskTracker,

    stopped: AtomicBool,
    fatal: SyncMutex<Option<PipelineError>>,
    reader: SyncMutex<Option<JoinHandle<()>>>,
    counters: FeederCounters,
}

impl std::fmt::Debug for Feeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feeder")
            .field("cache_dir", &self.cache_dir)
            .field("hot_capacity", &self.hot_capacity)
            .field("cold_capacity", &self.cold_capacity)
            .field("terminal", &self.terminal.load(Ordering::SeqCst))
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl Feeder {
    /// Create a feeder and make sure its cache directory exists
    pub async fn new(
        config: &PipelineConfig,
        fetcher: Arc<dyn Fetcher>,
        gate: Arc<MemoryGate>,
        janitor: Janitor,
    ) -> Result<Arc<Self>, PipelineError> {
        let cache_dir = config.cache_dir().clone();
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(|source| PipelineError::CacheDir {
                path: cache_dir.clone(),
                source,
            })?;

        let hot_capacity = config.hot_capacity();
        let cold_capacity = config.cold_capacity();

        Ok(Arc::new(Self {
            cache_dir,
            fetcher,
            gate,
            janitor,
            history: DedupHistory::from_config(config),
            fetch_slots: Arc::new(CountingLimiter::with_concurrency(
                config.max_concurrent_fetches(),
            )),
            queue_slots: Arc::new(CountingLimiter::with_concurrency(
                hot_capacity.saturating_add(cold_capacity),
            )),
            hot_capacity,
            cold_capacity,
            tiers: Mutex::new(Tiers::default()),
            changed: Notify::new(),
            terminal: AtomicBool::new(false),
            tracker: TaskTracker::new(),
            stopped: AtomicBool::new(false),
            fatal: SyncMutex::new(None),
            reader: SyncMutex::new(None),
            counters: FeederCounters::default(),
        }))
    }

    /// Start reading identities from `source` in the background
    ///
    /// Once the source is exhausted and every fetch task has finished, the
    /// terminal signal fires.
    pub fn run<R>(self: &Arc<Self>, source: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let feeder = Arc::clone(self);
        let handle = tokio::spawn(async move {
            feeder.read_identities(source).await;
            feeder.tracker.close();
            feeder.tracker.wait().await;
            feeder.fire_terminal();
        });
        *self.reader.lock() = Some(handle);
    }

    async fn read_identities<R>(self: &Arc<Self>, source: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut reader = BufReader::new(source);
        let mut raw = Vec::new();
        let mut line_no: u64 = 0;
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => line_no += 1,
                Err(e) => {
                    warn!("Failed to read identity list, stopping dispatch: {e}");
                    break;
                }
            }
            let Ok(line) = std::str::from_utf8(&raw) else {
                warn!("Skipping identity on line {line_no}: not valid UTF-8");
                self.counters.undecodable.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            let identity = line.trim();
            if identity.is_empty() {
                continue;
            }

            let queue_slot = self.queue_slots.acquire(1).await;
            let fetch_slot = self.fetch_slots.acquire(1).await;
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            let feeder = Arc::clone(self);
            let identity = identity.to_string();
            self.tracker.spawn(async move {
                feeder.fetch_and_admit(identity, queue_slot).await;
                drop(fetch_slot);
                feeder.changed.notify_waiters();
            });
        }
        debug!(
            "identity list exhausted after {} dispatches",
            self.counters.dispatched.load(Ordering::Relaxed)
        );
    }

    async fn fetch_and_admit(&self, identity: String, queue_slot: LimiterPermit) {
        if !self.history.add(&identity) {
            debug!("duplicate detected: {identity}");
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let fetched = match self.fetcher.fetch(&identity).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Skipping {identity}: {e}");
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let item = Item::new(
            identity,
            fetched.declared_len,
            fetched.body,
            Arc::clone(&self.gate),
            self.janitor.clone(),
        )
        .with_slot(queue_slot);

        if let Err(e) = self.admit(item).await {
            self.record_fatal(e);
        }
    }

    /// Place a fetched item into the hot tier, or spill it into the cold tier
    async fn admit(&self, mut item: Item) -> Result<(), PipelineError> {
        let mut tiers = self.tiers.lock().await;
        if self.stopped.load(Ordering::SeqCst) {
            // Dropping the item cleans it
            return Ok(());
        }

        if tiers.hot.len() < self.hot_capacity {
            tiers.hot.push(item);
            self.counters.admitted_hot.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        match spill(&mut item, &self.cache_dir).await {
            Ok(report) => {
                if report.mismatch {
                    self.counters.spill_mismatches.fetch_add(1, Ordering::Relaxed);
                }
                self.counters
                    .spilled_bytes
                    .fetch_add(report.written, Ordering::Relaxed);
                debug_assert!(
                    tiers.cold.len() < self.cold_capacity,
                    "queue slots must keep the cold tier within capacity"
                );
                tiers.cold.push(item);
                self.counters.admitted_cold.fetch_add(1, Ordering::Relaxed);
                if tiers.cold.len() >= self.cold_capacity {
                    debug!("cold tier full ({} items), dispatch will wait", tiers.cold.len());
                }
                Ok(())
            }
            Err(SpillError::Create(source)) => Err(PipelineError::SpillCreate {
                path: self.cache_dir.clone(),
                source,
            }),
            Err(e @ SpillError::Write(_)) => {
                warn!("Dropping {}: {e}", item.identity());
                self.counters.spill_failures.fetch_add(1, Ordering::Relaxed);
                item.clean();
                Ok(())
            }
        }
    }

    /// Pop the next item, waiting while the queue is empty
    ///
    /// Returns `None` only once the terminal signal has fired and the queue
    /// is empty (or the feeder was stopped), and on every call after that.
    pub async fn get(&self) -> Option<Item> {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if self.stopped.load(Ordering::SeqCst) {
                return None;
            }
            // Read before popping: once terminal is set every admission has
            // already happened, so an empty pop really is the end.
            let terminal = self.terminal.load(Ordering::SeqCst);
            if let Some(item) = self.pop().await {
                return Some(item);
            }
            if terminal {
                return None;
            }
            changed.await;
        }
    }

    async fn pop(&self) -> Option<Item> {
        let mut tiers = self.tiers.lock().await;
        let mut item = match tiers.hot.pop() {
            Some(item) => item,
            None => tiers.cold.pop()?,
        };
        item.release_slot();
        Some(item)
    }

    fn fire_terminal(&self) {
        if !self.terminal.swap(true, Ordering::SeqCst) {
            info!(
                "All fetches finished: {} dispatched, {} duplicates, {} failed",
                self.counters.dispatched.load(Ordering::Relaxed),
                self.counters.duplicates.load(Ordering::Relaxed),
                self.counters.fetch_failures.load(Ordering::Relaxed)
            );
        }
        self.changed.notify_waiters();
    }

    /// Whether the terminal signal has fired
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    /// Wait until every dispatched fetch has finished and the input is
    /// exhausted
    pub async fn wait_terminal(&self) {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if self.is_terminal() || self.stopped.load(Ordering::SeqCst) {
                return;
            }
            changed.await;
        }
    }

    fn record_fatal(&self, error: PipelineError) {
        warn!("Stopping feeder: {error}");
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(error);
            }
        }
        self.stopped.store(true, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Take the fatal error that stopped the feeder, if any
    pub fn take_fatal(&self) -> Option<PipelineError> {
        self.fatal.lock().take()
    }

    /// Stop dispatching, release everything still queued, and end `get`
    pub async fn abort(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.tracker.close();

        let drained = {
            let mut tiers = self.tiers.lock().await;
            let mut drained = std::mem::take(&mut tiers.hot);
            drained.append(&mut tiers.cold);
            drained
        };
        if !drained.is_empty() {
            debug!("releasing {} queued items", drained.len());
        }
        drop(drained);
        self.changed.notify_waiters();
    }

    /// Wait for the background reader to finish
    pub async fn join_reader(&self) {
        let Some(handle) = self.reader.lock().take() else {
            return;
        };
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Identity reader task failed: {e}"),
        }
    }

    /// Current counters and queue lengths
    pub async fn stats(&self) -> FeederStats {
        let (queued_hot, queued_cold) = {
            let tiers = self.tiers.lock().await;
            (tiers.hot.len(), tiers.cold.len())
        };
        let c = &self.counters;
        FeederStats {
            dispatched: c.dispatched.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            fetch_failures: c.fetch_failures.load(Ordering::Relaxed),
            undecodable: c.undecodable.load(Ordering::Relaxed),
            admitted_hot: c.admitted_hot.load(Ordering::Relaxed),
            admitted_cold: c.admitted_cold.load(Ordering::Relaxed),
            spill_failures: c.spill_failures.load(Ordering::Relaxed),
            spill_mismatches: c.spill_mismatches.load(Ordering::Relaxed),
            spilled_bytes: c.spilled_bytes.load(Ordering::Relaxed),
            queued_hot,
            queued_cold,
        }
    }
}
