//! Run wiring: memory gate, janitor, feeder and worker pool for one pass
//! over an identity list

pub mod errors;
pub mod runner;

pub use errors::PipelineError;
pub use runner::{Pipeline, RunSummary};
