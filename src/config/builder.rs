//! Type-safe builder for `PipelineConfig` using the typestate pattern
//!
//! The cache directory is the only required field; `build()` exists only
//! once it has been set. Everything else starts from the defaults in
//! `utils::constants` and is validated in `build()`.

use anyhow::{Result, bail};
use std::marker::PhantomData;
use std::path::PathBuf;

use super::types::{HistoryEviction, MemorySourceKind, PipelineConfig};

// Type states for the builder
pub struct WithCacheDir;

pub struct PipelineConfigBuilder<State = ()> {
    pub(crate) inner: PipelineConfig,
    pub(crate) _phantom: PhantomData<State>,
}

impl Default for PipelineConfigBuilder<()> {
    fn default() -> Self {
        Self {
            inner: PipelineConfig::default(),
            _phantom: PhantomData,
        }
    }
}

impl PipelineConfig {
    /// Create a builder for configuring a `PipelineConfig` with a fluent interface
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder<()> {
        PipelineConfigBuilder::default()
    }

    /// Re-open an existing config (e.g. loaded from JSON) for overrides and
    /// validation
    #[must_use]
    pub fn into_builder(self) -> PipelineConfigBuilder<WithCacheDir> {
        PipelineConfigBuilder {
            inner: self,
            _phantom: PhantomData,
        }
    }
}

impl PipelineConfigBuilder<()> {
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> PipelineConfigBuilder<WithCacheDir> {
        self.inner.cache_dir = dir.into();
        PipelineConfigBuilder {
            inner: self.inner,
            _phantom: PhantomData,
        }
    }
}

impl PipelineConfigBuilder<WithCacheDir> {
    /// Replace the cache directory chosen earlier
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.inner.cache_dir = dir.into();
        self
    }

    pub fn build(self) -> Result<PipelineConfig> {
        let config = self.inner;

        if config.cache_dir.as_os_str().is_empty() {
            bail!("cache_dir must not be empty");
        }
        if config.memory_ceiling_bytes == 0 {
            bail!("memory_ceiling_bytes must be greater than zero");
        }
        if config.hot_capacity == 0 {
            bail!("hot_capacity must be at least 1");
        }
        if config.max_concurrent_fetches == 0 {
            bail!("max_concurrent_fetches must be at least 1");
        }
        if config.max_concurrent_analyses == 0 {
            bail!("max_concurrent_analyses must be at least 1");
        }
        if config.history_enabled && config.history_size == 0 {
            bail!("history_size must be at least 1 when history is enabled");
        }
        if config.release_tick_ms == 0 {
            bail!("release_tick_ms must be greater than zero");
        }
        if config.decode_placeholder_bytes > config.memory_ceiling_bytes {
            log::warn!(
                "decode placeholder ({} bytes) exceeds the memory ceiling ({} bytes); \
                 reservations will be clamped to the ceiling",
                config.decode_placeholder_bytes,
                config.memory_ceiling_bytes
            );
        }

        Ok(config)
    }
}

// Methods available in every state
impl<State> PipelineConfigBuilder<State> {
    #[must_use]
    pub fn memory_ceiling_bytes(mut self, bytes: u64) -> Self {
        self.inner.memory_ceiling_bytes = bytes;
        self
    }

    #[must_use]
    pub fn memory_source(mut self, kind: MemorySourceKind) -> Self {
        self.inner.memory_source = kind;
        self
    }

    #[must_use]
    pub fn release_tick_ms(mut self, ms: u64) -> Self {
        self.inner.release_tick_ms = ms;
        self
    }

    #[must_use]
    pub fn hot_capacity(mut self, items: usize) -> Self {
        self.inner.hot_capacity = items;
        self
    }

    /// Zero is allowed: nothing spills and dispatch blocks as soon as the hot
    /// tier is full.
    #[must_use]
    pub fn cold_capacity(mut self, items: usize) -> Self {
        self.inner.cold_capacity = items;
        self
    }

    #[must_use]
    pub fn max_concurrent_fetches(mut self, n: usize) -> Self {
        self.inner.max_concurrent_fetches = n;
        self
    }

    #[must_use]
    pub fn max_concurrent_analyses(mut self, n: usize) -> Self {
        self.inner.max_concurrent_analyses = n;
        self
    }

    #[must_use]
    pub fn history_enabled(mut self, enabled: bool) -> Self {
        self.inner.history_enabled = enabled;
        self
    }

    #[must_use]
    pub fn history_size(mut self, size: usize) -> Self {
        self.inner.history_size = size;
        self
    }

    #[must_use]
    pub fn history_eviction(mut self, eviction: HistoryEviction) -> Self {
        self.inner.history_eviction = eviction;
        self
    }

    #[must_use]
    pub fn decode_placeholder_bytes(mut self, bytes: u64) -> Self {
        self.inner.decode_placeholder_bytes = bytes;
        self
    }

    #[must_use]
    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.inner.fetch_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.inner.user_agent = agent.into();
        self
    }

    #[must_use]
    pub fn janitor_attempts(mut self, attempts: u32) -> Self {
        self.inner.janitor_attempts = attempts;
        self
    }

    #[must_use]
    pub fn janitor_delay_ms(mut self, ms: u64) -> Self {
        self.inner.janitor_delay_ms = ms;
        self
    }
}
