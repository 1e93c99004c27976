//! Producer stage: identity list in, queued items out
//!
//! The [`Feeder`] owns the two-tier queue. Hot items keep their response
//! stream in memory; once the hot tier is full, fresh items are spilled to
//! the cache directory and queued cold.

pub mod core;
pub mod history;
pub mod item;
pub mod janitor;
mod spill;

pub use self::core::{Feeder, FeederStats};
pub use history::DedupHistory;
pub use item::Item;
pub use janitor::{Janitor, JanitorHandle, JanitorStats};
