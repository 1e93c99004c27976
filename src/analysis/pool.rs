//! Bounded analysis workers
//!
//! Pulls items from the [`Feeder`] until it reports the end of input and
//! runs at most `max_concurrent_analyses` analyses at once. Each analysis
//! decodes one image, ranks its colors and appends one line to the shared
//! sink. The item is cleaned whatever the outcome.

use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};

use super::decode::{decode_raster, is_supported, raster_dimensions};
use super::errors::AnalysisError;
use super::palette::{ColorCount, format_line, top_colors};
use crate::feeder::{Feeder, Item};
use crate::limiter::{CountingLimiter, MemoryGate, MemoryPermit};
use crate::pipeline::PipelineError;

/// Colors reported per image
pub const TOP_COLORS: usize = 3;

/// Charged per decoded pixel: the decoder's own buffer plus the RGBA copy
pub const RASTER_BYTES_PER_PIXEL: u64 = 8;

/// Outcome counters for one pool run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisStats {
    /// Items that produced a result line
    pub analyzed: u64,
    /// Items dropped on a read, decode or format error
    pub skipped: u64,
}

struct Analyzer<W> {
    gate: Arc<MemoryGate>,
    placeholder_bytes: u64,
    sink: Mutex<W>,
}

/// Consumer side of the pipeline
pub struct WorkerPool<W> {
    feeder: Arc<Feeder>,
    slots: Arc<CountingLimiter>,
    analyzer: Arc<Analyzer<W>>,
}

impl<W> WorkerPool<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    #[must_use]
    pub fn new(
        feeder: Arc<Feeder>,
        gate: Arc<MemoryGate>,
        max_concurrent: usize,
        placeholder_bytes: u64,
        sink: W,
    ) -> Self {
        Self {
            feeder,
            slots: Arc::new(CountingLimiter::with_concurrency(max_concurrent)),
            analyzer: Arc::new(Analyzer {
                gate,
                placeholder_bytes,
                sink: Mutex::new(sink),
            }),
        }
    }

    /// Analyze items until the feeder runs dry
    ///
    /// Returns the sink so the caller can flush or inspect it. A sink write
    /// failure aborts the analyses still running and is returned as
    /// [`PipelineError::Sink`].
    pub async fn run(self) -> Result<(AnalysisStats, W), PipelineError> {
        let mut stats = AnalysisStats::default();
        let mut tasks: JoinSet<Result<bool, PipelineError>> = JoinSet::new();

        let outcome = loop {
            let permit = self.slots.acquire(1).await;

            let item = tokio::select! {
                item = self.feeder.get() => item,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    drop(permit);
                    if let Err(e) = settle(joined, &mut stats) {
                        break Err(e);
                    }
                    continue;
                }
            };
            let Some(item) = item else {
                break Ok(());
            };

            let analyzer = Arc::clone(&self.analyzer);
            tasks.spawn(async move {
                let analyzed = analyzer.analyze(item).await;
                drop(permit);
                analyzed
            });
        };

        if let Err(e) = outcome {
            warn!("Stopping analysis: {e}");
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
                    _ => {}
                }
            }
            return Err(e);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = settle(joined, &mut stats) {
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                return Err(e);
            }
        }

        let analyzer = Arc::try_unwrap(self.analyzer)
            .map_err(|_| PipelineError::Join("analysis tasks still hold the sink".into()))?;
        Ok((stats, analyzer.sink.into_inner()))
    }
}

/// Fold one finished task into the stats; panics are re-raised
fn settle(
    joined: Result<Result<bool, PipelineError>, JoinError>,
    stats: &mut AnalysisStats,
) -> Result<(), PipelineError> {
    match joined {
        Ok(Ok(true)) => stats.analyzed += 1,
        Ok(Ok(false)) => stats.skipped += 1,
        Ok(Err(e)) => return Err(e),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => return Err(PipelineError::Join(e.to_string())),
    }
    Ok(())
}

impl<W> Analyzer<W>
where
    W: AsyncWrite + Send + Unpin,
{
    /// Returns whether a result line was written
    async fn analyze(&self, mut item: Item) -> Result<bool, PipelineError> {
        let start = Instant::now();

        let written = match self.summarize(&mut item).await {
            Ok(colors) => {
                let line = format_line(item.identity(), &colors);
                let mut sink = self.sink.lock().await;
                sink.write_all(line.as_bytes())
                    .await
                    .map_err(PipelineError::Sink)?;
                true
            }
            Err(e) => {
                warn!("Skipping {}: {e}", item.identity());
                false
            }
        };

        debug!(
            target: "chromafeed::analysis",
            "image {} processed in {:?}",
            item.identity(),
            start.elapsed()
        );
        item.clean();
        Ok(written)
    }

    async fn summarize(&self, item: &mut Item) -> Result<Vec<ColorCount>, AnalysisError> {
        let ceiling = self.gate.ceiling();
        let expected = self.placeholder_bytes.max(item.declared_size().unwrap_or(0));
        let mut allowance = self.gate.reserve(expected.min(ceiling)).await;

        // The buffer never outgrows the allowance by more than one byte
        let reader = item.get_data().await.ok_or(AnalysisError::NoData)?;
        let mut bytes = Vec::new();
        loop {
            let room = allowance.bytes().saturating_sub(bytes.len() as u64);
            let read = (&mut *reader).take(room).read_to_end(&mut bytes).await? as u64;
            if read < room {
                break;
            }
            let mut next = [0u8; 1];
            if reader.read(&mut next).await? == 0 {
                break;
            }
            bytes.push(next[0]);
            if allowance.bytes() >= ceiling {
                return Err(AnalysisError::TooLarge {
                    needed: bytes.len() as u64,
                    ceiling,
                });
            }
            let wanted = (bytes.len() as u64).saturating_mul(2).min(ceiling);
            allowance = self.regrow(allowance, wanted).await;
        }

        let (width, height) = raster_dimensions(&bytes)?;
        let raster = u64::from(width)
            .saturating_mul(u64::from(height))
            .saturating_mul(RASTER_BYTES_PER_PIXEL);
        let needed = (bytes.len() as u64).saturating_add(raster);
        if needed > ceiling {
            return Err(AnalysisError::TooLarge { needed, ceiling });
        }
        let allowance = self.regrow(allowance, needed).await;

        let decoded = tokio::task::spawn_blocking(move || decode_raster(&bytes)).await;
        let (format, raster) = match decoded {
            Ok(decoded) => decoded?,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => return Err(AnalysisError::Read(std::io::Error::other(e))),
        };
        if !is_supported(format) {
            return Err(AnalysisError::Unsupported(format));
        }

        let colors = top_colors(&raster, TOP_COLORS);
        drop(allowance);
        Ok(colors)
    }

    /// Widen `permit` to `total` bytes, giving it up and queueing again
    /// when the extra does not fit right away
    async fn regrow(&self, mut permit: MemoryPermit, total: u64) -> MemoryPermit {
        let extra = total.saturating_sub(permit.bytes());
        if extra == 0 || permit.try_grow(extra) {
            return permit;
        }
        debug!(
            target: "chromafeed::analysis",
            "allowance of {} bytes cannot grow to {total} in place, re-reserving",
            permit.bytes()
        );
        drop(permit);
        self.gate.reserve(total).await
    }
}
