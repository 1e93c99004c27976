//! Configuration module for pipeline runs
//!
//! This module provides the `PipelineConfig` struct and its type-safe builder
//! with validation and sensible defaults.

// Sub-modules
pub mod builder;
pub mod types;

// Re-exports for public API
pub use builder::{PipelineConfigBuilder, WithCacheDir};
pub use types::{HistoryEviction, MemorySourceKind, PipelineConfig};
