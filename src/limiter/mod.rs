//! Admission control primitives
//!
//! `CountingLimiter` bounds concurrent units of work; `MemoryGate` bounds
//! allocation-heavy work against a memory ceiling. Each owns its own wake-up
//! signal and neither is ever awaited while the other's lock is held.

pub mod counting;
pub mod memory;

pub use counting::{CountingLimiter, LimiterPermit};
pub use memory::{MemoryGate, MemoryPermit, MemorySource, ProcessMemory, TrackedMemory};
