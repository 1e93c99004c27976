//! Shared configuration constants for chromafeed
//!
//! Default values used by the config builder and the pipeline stages, kept
//! in one place to avoid magic numbers.

pub const MIB: u64 = 1 << 20;

/// Default memory ceiling: 512 MiB
pub const DEFAULT_MEMORY_CEILING_BYTES: u64 = 512 * MIB;

/// Maximum concurrent fetches: 10
///
/// Each in-flight fetch holds an open connection and, once admitted to the
/// hot tier, an unread response body.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 10;

/// Maximum concurrent analyses: 5
///
/// Decoding is CPU-bound and memory-hungry; more analyses than cores only
/// raises the peak footprint.
pub const DEFAULT_MAX_CONCURRENT_ANALYSES: usize = 5;

/// Hot tier capacity: 100 items kept in memory
pub const DEFAULT_HOT_CAPACITY: usize = 100;

/// Cold tier capacity: 100,000 items spilled to disk
///
/// Every cold item is one temp file, so this is also the upper bound on temp
/// files in the cache directory.
pub const DEFAULT_COLD_CAPACITY: usize = 100_000;

/// Dedup history capacity: 100,000 identities
pub const DEFAULT_HISTORY_SIZE: usize = 100_000;

/// Worst-case decode footprint reserved before each decode: 10 MiB
pub const DEFAULT_DECODE_PLACEHOLDER_BYTES: u64 = 10 * MIB;

/// Interval of the memory gate's background wake-up
pub const DEFAULT_RELEASE_TICK_MS: u64 = 1_000;

/// Per-request fetch timeout
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

/// Temp-file delete retries handed to the janitor
pub const DEFAULT_JANITOR_ATTEMPTS: u32 = 3;

/// Delay between janitor delete retries
pub const DEFAULT_JANITOR_DELAY_MS: u64 = 1_000;

/// Prefix for spilled payload files in the cache directory
pub const SPILL_FILE_PREFIX: &str = "tmp.";

/// User agent sent with every fetch
pub const DEFAULT_USER_AGENT: &str = concat!("chromafeed/", env!("CARGO_PKG_VERSION"));
