//! Memory admission gate
//!
//! `MemoryGate` holds allocation-heavy work back until the sampled memory
//! usage plus the requested amount fits under a fixed ceiling. Usage always
//! comes from a [`MemorySource`]; the gate itself only counts the permits it
//! has handed out.
//!
//! Two sources are provided:
//! - [`TrackedMemory`]: an explicit ledger charged and discharged by every
//!   [`MemoryPermit`]. Exact for the reservations made through the gate.
//! - [`ProcessMemory`]: resident set size sampled through `sysinfo`. This is
//!   an eventually-consistent signal (the allocator may hold on to freed
//!   pages), so admission decisions made with it are approximate.
//!
//! A background task wakes waiters on a fixed interval so that memory freed
//! without an explicit `check_release` cannot stall the gate forever.
//!
//! While no permit is outstanding, waiting cannot free anything the gate
//! knows about, so a request is admitted even if it does not fit (a sampled
//! RSS never drops to zero). The overshoot is logged.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Where the gate reads current memory usage from
pub trait MemorySource: Send + Sync + fmt::Debug {
    /// Current usage in bytes
    fn usage(&self) -> u64;

    /// Record a reservation. Sampling sources ignore this.
    fn charge(&self, _bytes: u64) {}

    /// Undo a reservation. Sampling sources ignore this.
    fn discharge(&self, _bytes: u64) {}
}

/// Explicit byte ledger
#[derive(Debug, Default)]
pub struct TrackedMemory {
    used: AtomicU64,
}

impl TrackedMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemorySource for TrackedMemory {
    fn usage(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    fn charge(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::AcqRel);
    }

    fn discharge(&self, bytes: u64) {
        let result = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
        match result {
            Ok(previous) if previous < bytes => {
                warn!("memory ledger discharged {bytes} bytes with only {previous} charged");
            }
            _ => {}
        }
    }
}

/// Resident set size of the current process
pub struct ProcessMemory {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl fmt::Debug for ProcessMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessMemory")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMemory {
    #[must_use]
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            warn!("cannot resolve current pid; process memory will read as zero");
        }
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl MemorySource for ProcessMemory {
    fn usage(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(sysinfo::Process::memory).unwrap_or(0)
    }
}

/// Blocking admission gate against a memory ceiling
pub struct MemoryGate {
    ceiling: u64,
    source: Arc<dyn MemorySource>,
    /// Serializes sample-and-charge so two reservations cannot both pass on
    /// the same sample
    admit: Mutex<()>,
    /// Permits currently held
    outstanding: AtomicUsize,
    changed: Notify,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for MemoryGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryGate")
            .field("ceiling", &self.ceiling)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl MemoryGate {
    /// Create a gate and start its release ticker
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime (the ticker is spawned).
    pub fn new(ceiling: u64, source: Arc<dyn MemorySource>, release_tick: Duration) -> Arc<Self> {
        let gate = Arc::new(Self {
            ceiling,
            source,
            admit: Mutex::new(()),
            outstanding: AtomicUsize::new(0),
            changed: Notify::new(),
            ticker: Mutex::new(None),
        });

        let handle = tokio::spawn(release_ticker(Arc::downgrade(&gate), release_tick));
        *gate.ticker.lock() = Some(handle);
        gate
    }

    #[must_use]
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Current usage as reported by the source
    #[must_use]
    pub fn usage(&self) -> u64 {
        self.source.usage()
    }

    /// Wait until `usage + bytes <= ceiling`
    pub async fn check_addition(&self, bytes: u64) {
        self.wait_for_room(bytes, false).await;
    }

    /// Wake every waiter so it re-samples usage. Nothing is decremented.
    pub fn check_release(&self) {
        self.changed.notify_waiters();
    }

    /// Wait for room, charge the source, and hold the allowance until the
    /// permit drops
    pub async fn reserve(self: &Arc<Self>, bytes: u64) -> MemoryPermit {
        let bytes = self.wait_for_room(bytes, true).await;
        MemoryPermit {
            gate: Arc::clone(self),
            bytes,
        }
    }

    fn clamp(&self, bytes: u64) -> u64 {
        if bytes > self.ceiling {
            warn!(
                "memory request of {bytes} bytes exceeds the ceiling of {} bytes, clamping",
                self.ceiling
            );
            self.ceiling
        } else {
            bytes
        }
    }

    /// Permits currently held on this gate
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn try_admit(&self, bytes: u64, charge: bool) -> bool {
        let _admit = self.admit.lock();
        let used = self.source.usage();
        if used.saturating_add(bytes) > self.ceiling {
            if self.outstanding.load(Ordering::Acquire) > 0 {
                return false;
            }
            warn!(
                target: "chromafeed::memory",
                "Admitting {bytes} bytes over the ceiling: {used} bytes in use, ceiling {}, no reservation left to wait for",
                self.ceiling
            );
        }
        if charge {
            self.source.charge(bytes);
            self.outstanding.fetch_add(1, Ordering::AcqRel);
        }
        true
    }

    async fn wait_for_room(&self, bytes: u64, charge: bool) -> u64 {
        let bytes = self.clamp(bytes);
        let mut waited = false;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_admit(bytes, charge) {
                if waited {
                    debug!("memory available for {bytes} bytes");
                }
                return bytes;
            }
            if !waited {
                info!(
                    target: "chromafeed::memory",
                    "Waiting for memory: {} bytes in use, {bytes} requested, ceiling {}",
                    self.source.usage(),
                    self.ceiling
                );
                waited = true;
            }
            notified.await;
        }
    }
}

impl Drop for MemoryGate {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
    }
}

async fn release_ticker(gate: Weak<MemoryGate>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        match gate.upgrade() {
            Some(gate) => gate.check_release(),
            None => break,
        }
    }
}

/// Memory allowance held on a [`MemoryGate`]
#[derive(Debug)]
#[must_use = "the allowance is released as soon as the permit is dropped"]
pub struct MemoryPermit {
    gate: Arc<MemoryGate>,
    bytes: u64,
}

impl MemoryPermit {
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Add `extra` bytes to this allowance if they fit right now
    ///
    /// Never waits: a holder waiting for more while others do the same
    /// could never be admitted.
    pub fn try_grow(&mut self, extra: u64) -> bool {
        let gate = &self.gate;
        let _admit = gate.admit.lock();
        let total = self.bytes.saturating_add(extra);
        if total > gate.ceiling || gate.source.usage().saturating_add(extra) > gate.ceiling {
            return false;
        }
        gate.source.charge(extra);
        self.bytes = total;
        true
    }
}

impl Drop for MemoryPermit {
    fn drop(&mut self) {
        self.gate.source.discharge(self.bytes);
        self.gate.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.gate.check_release();
    }
}
