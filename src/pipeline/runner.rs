//! One pipeline run, end to end

use log::{info, warn};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};

use super::errors::PipelineError;
use crate::analysis::{AnalysisStats, WorkerPool};
use crate::config::{MemorySourceKind, PipelineConfig};
use crate::feeder::{Feeder, FeederStats, Janitor, JanitorStats};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::limiter::{MemoryGate, MemorySource, ProcessMemory, TrackedMemory};

/// What a finished run did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub feeder: FeederStats,
    pub analysis: AnalysisStats,
    pub janitor: JanitorStats,
    pub elapsed: Duration,
}

/// A validated configuration plus the transport to fetch with
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validate `config` and pair it with `fetcher`
    pub fn new(config: PipelineConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, PipelineError> {
        let config = config
            .into_builder()
            .build()
            .map_err(|e| PipelineError::Config(format!("{e:#}")))?;
        Ok(Self { config, fetcher })
    }

    /// Pipeline fetching over HTTP(S)
    pub fn with_http(config: PipelineConfig) -> Result<Self, PipelineError> {
        let fetcher =
            HttpFetcher::new(&config).map_err(|e| PipelineError::Config(format!("{e:#}")))?;
        Self::new(config, Arc::new(fetcher))
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run over `source`, appending results to `sink`, and flush it
    pub async fn run<R, W>(&self, source: R, sink: W) -> Result<RunSummary, PipelineError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.run_into(source, sink).await.map(|(summary, _)| summary)
    }

    /// Like [`Pipeline::run`], but hands the flushed sink back
    pub async fn run_into<R, W>(&self, source: R, sink: W) -> Result<(RunSummary, W), PipelineError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let started = Instant::now();
        let config = &self.config;

        let memory: Arc<dyn MemorySource> = match config.memory_source() {
            MemorySourceKind::Tracked => Arc::new(TrackedMemory::new()),
            MemorySourceKind::Process => Arc::new(ProcessMemory::new()),
        };
        let gate = MemoryGate::new(config.memory_ceiling_bytes(), memory, config.release_tick());
        let (janitor, janitor_handle) =
            Janitor::spawn(config.janitor_attempts(), config.janitor_delay());

        let feeder = match Feeder::new(
            config,
            Arc::clone(&self.fetcher),
            Arc::clone(&gate),
            janitor,
        )
        .await
        {
            Ok(feeder) => feeder,
            Err(e) => {
                janitor_handle.shutdown().await;
                return Err(e);
            }
        };

        info!(
            "Starting run: cache {}, ceiling {} bytes, hot {}, cold {}",
            config.cache_dir().display(),
            config.memory_ceiling_bytes(),
            config.hot_capacity(),
            config.cold_capacity()
        );
        feeder.run(source);

        let pool = WorkerPool::new(
            Arc::clone(&feeder),
            Arc::clone(&gate),
            config.max_concurrent_analyses(),
            config.decode_placeholder_bytes(),
            sink,
        );
        let pooled = pool.run().await;

        let finished = match pooled {
            Ok((analysis, mut sink)) => match sink.flush().await {
                Ok(()) => Ok((analysis, sink)),
                Err(e) => Err(PipelineError::Sink(e)),
            },
            Err(e) => Err(e),
        };

        let fatal = match finished {
            Ok(_) => feeder.take_fatal(),
            Err(_) => None,
        };
        if finished.is_err() || fatal.is_some() {
            feeder.abort().await;
        }
        feeder.join_reader().await;

        let feeder_stats = feeder.stats().await;
        // Release anything still queued while the janitor can take retries
        feeder.abort().await;
        drop(feeder);
        let janitor_stats = janitor_handle.shutdown().await;

        if let Some(fatal) = fatal {
            warn!("Run stopped early: {fatal}");
            return Err(fatal);
        }
        let (analysis, sink) = finished?;

        let summary = RunSummary {
            feeder: feeder_stats,
            analysis,
            janitor: janitor_stats,
            elapsed: started.elapsed(),
        };
        info!(
            "Run finished in {:?}: {} analyzed, {} skipped, {} duplicates, {} fetch failures",
            summary.elapsed,
            analysis.analyzed,
            analysis.skipped,
            feeder_stats.duplicates,
            feeder_stats.fetch_failures
        );
        Ok((summary, sink))
    }

    /// Read identities from `source_path` and write results to
    /// `results_path` (created or truncated)
    pub async fn run_files(
        &self,
        source_path: &Path,
        results_path: &Path,
    ) -> Result<RunSummary, PipelineError> {
        let source = tokio::fs::File::open(source_path)
            .await
            .map_err(|source| PipelineError::Io {
                path: source_path.to_path_buf(),
                source,
            })?;
        let results = tokio::fs::File::create(results_path)
            .await
            .map_err(|source| PipelineError::Io {
                path: results_path.to_path_buf(),
                source,
            })?;
        self.run(source, BufWriter::new(results)).await
    }
}
