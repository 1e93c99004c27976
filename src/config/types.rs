//! Core configuration types for a pipeline run
//!
//! `PipelineConfig` carries every tunable of the fetch → queue → analysis
//! pipeline. It is built through the typestate builder in `builder.rs` and
//! can be round-tripped through JSON so a run can be described by a file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::{
    DEFAULT_COLD_CAPACITY, DEFAULT_DECODE_PLACEHOLDER_BYTES, DEFAULT_FETCH_TIMEOUT_SECS,
    DEFAULT_HISTORY_SIZE, DEFAULT_HOT_CAPACITY, DEFAULT_JANITOR_ATTEMPTS, DEFAULT_JANITOR_DELAY_MS,
    DEFAULT_MAX_CONCURRENT_ANALYSES, DEFAULT_MAX_CONCURRENT_FETCHES, DEFAULT_MEMORY_CEILING_BYTES,
    DEFAULT_RELEASE_TICK_MS, DEFAULT_USER_AGENT,
};

/// Which signal the memory gate samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySourceKind {
    /// Explicit ledger of reservations made through the gate
    #[default]
    Tracked,
    /// Resident set size of the current process, sampled from the OS
    Process,
}

/// What the dedup history does when it reaches capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryEviction {
    /// Forget the least recently seen identity
    #[default]
    Lru,
    /// Clear the whole set before the next insertion
    Reset,
}

/// Main configuration struct for a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory receiving spilled payloads. Created if absent.
    pub(crate) cache_dir: PathBuf,

    /// Hard ceiling for the memory gate, in bytes
    pub(crate) memory_ceiling_bytes: u64,
    pub(crate) memory_source: MemorySourceKind,

    /// Interval of the gate's background wake-up.
    ///
    /// Guards against stalls when memory was freed but nobody signalled it.
    pub(crate) release_tick_ms: u64,

    /// Items kept in memory before spilling starts
    pub(crate) hot_capacity: usize,
    /// Items allowed on disk. Dispatch blocks once both tiers are full.
    pub(crate) cold_capacity: usize,

    pub(crate) max_concurrent_fetches: usize,
    pub(crate) max_concurrent_analyses: usize,

    pub(crate) history_enabled: bool,
    pub(crate) history_size: usize,
    pub(crate) history_eviction: HistoryEviction,

    /// Allowance reserved from the memory gate around every decode
    pub(crate) decode_placeholder_bytes: u64,

    pub(crate) fetch_timeout_secs: u64,
    pub(crate) user_agent: String,

    /// Delete attempts the janitor makes for a temp file that could not be
    /// removed on cleanup
    pub(crate) janitor_attempts: u32,
    pub(crate) janitor_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
            memory_ceiling_bytes: DEFAULT_MEMORY_CEILING_BYTES,
            memory_source: MemorySourceKind::Tracked,
            release_tick_ms: DEFAULT_RELEASE_TICK_MS,
            hot_capacity: DEFAULT_HOT_CAPACITY,
            cold_capacity: DEFAULT_COLD_CAPACITY,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            max_concurrent_analyses: DEFAULT_MAX_CONCURRENT_ANALYSES,
            history_enabled: true,
            history_size: DEFAULT_HISTORY_SIZE,
            history_eviction: HistoryEviction::Lru,
            decode_placeholder_bytes: DEFAULT_DECODE_PLACEHOLDER_BYTES,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            janitor_attempts: DEFAULT_JANITOR_ATTEMPTS,
            janitor_delay_ms: DEFAULT_JANITOR_DELAY_MS,
        }
    }
}

impl PipelineConfig {
    /// Load a config from a JSON document. Missing fields take defaults.
    ///
    /// The result is not validated; pass it through
    /// [`PipelineConfig::into_builder`] and `build()` for that.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    #[must_use]
    pub fn memory_ceiling_bytes(&self) -> u64 {
        self.memory_ceiling_bytes
    }

    #[must_use]
    pub fn memory_source(&self) -> MemorySourceKind {
        self.memory_source
    }

    #[must_use]
    pub fn release_tick(&self) -> Duration {
        Duration::from_millis(self.release_tick_ms)
    }

    #[must_use]
    pub fn hot_capacity(&self) -> usize {
        self.hot_capacity
    }

    #[must_use]
    pub fn cold_capacity(&self) -> usize {
        self.cold_capacity
    }

    #[must_use]
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_concurrent_fetches
    }

    #[must_use]
    pub fn max_concurrent_analyses(&self) -> usize {
        self.max_concurrent_analyses
    }

    #[must_use]
    pub fn history_enabled(&self) -> bool {
        self.history_enabled
    }

    #[must_use]
    pub fn history_size(&self) -> usize {
        self.history_size
    }

    #[must_use]
    pub fn history_eviction(&self) -> HistoryEviction {
        self.history_eviction
    }

    #[must_use]
    pub fn decode_placeholder_bytes(&self) -> u64 {
        self.decode_placeholder_bytes
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn janitor_attempts(&self) -> u32 {
        self.janitor_attempts
    }

    #[must_use]
    pub fn janitor_delay(&self) -> Duration {
        Duration::from_millis(self.janitor_delay_ms)
    }
}
