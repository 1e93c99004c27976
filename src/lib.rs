//! Memory-bounded fetch-and-analyze pipeline
//!
//! Reads a list of image URLs, fetches them with bounded concurrency into a
//! two-tier queue (memory first, then spill files in a cache directory),
//! skips duplicates, and reports the three most frequent colors of each
//! image as one line per URL.
//!
//! ```no_run
//! # async fn demo() -> Result<(), chromafeed::PipelineError> {
//! use chromafeed::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::builder()
//!     .cache_dir("./cache")
//!     .memory_ceiling_bytes(256 * chromafeed::utils::MIB)
//!     .build()
//!     .map_err(|e| chromafeed::PipelineError::Config(e.to_string()))?;
//! let pipeline = Pipeline::with_http(config)?;
//! let summary = pipeline
//!     .run_files("input.txt".as_ref(), "results.txt".as_ref())
//!     .await?;
//! println!("{} images analyzed", summary.analysis.analyzed);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod config;
pub mod feeder;
pub mod fetch;
pub mod limiter;
pub mod pipeline;
pub mod utils;

pub use analysis::{AnalysisError, AnalysisStats, ColorCount, Rgb, WorkerPool};
pub use config::{HistoryEviction, MemorySourceKind, PipelineConfig, PipelineConfigBuilder};
pub use feeder::{DedupHistory, Feeder, FeederStats, Item, Janitor, JanitorStats};
pub use fetch::{ByteStream, FetchError, FetchedBody, Fetcher, HttpFetcher};
pub use limiter::{CountingLimiter, LimiterPermit, MemoryGate, MemoryPermit, MemorySource};
pub use pipeline::{Pipeline, PipelineError, RunSummary};
