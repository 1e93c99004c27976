//! Error types for a pipeline run
//!
//! Only failures that end the run live here. Per-item problems (fetch,
//! decode, spill copy) are logged and skipped where they happen.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to prepare cache directory {}: {source}", path.display())]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No temp file could be created in the cache directory
    #[error("Failed to create spill file in {}: {source}", path.display())]
    SpillCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing or flushing the results sink failed
    #[error("Failed to write results: {0}")]
    Sink(#[source] std::io::Error),

    #[error("Task failed: {0}")]
    Join(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
