//! Types shared by every fetch transport

use futures::future::BoxFuture;
use tokio::io::AsyncRead;

/// Readable payload, consumed once
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Future returned by [`Fetcher::fetch`]
pub type FetchFuture<'a> = BoxFuture<'a, Result<FetchedBody, FetchError>>;

/// A successful fetch: the body plus the length the remote declared for it
pub struct FetchedBody {
    /// `None` when the transport did not declare a length
    pub declared_len: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for FetchedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedBody")
            .field("declared_len", &self.declared_len)
            .finish_non_exhaustive()
    }
}

/// Error type for fetch failures
///
/// A non-success status is reported separately from transport errors, but
/// the pipeline treats both the same way: the identity is skipped.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid identity '{identity}': {reason}")]
    InvalidIdentity { identity: String, reason: String },

    #[error("Fetch failed for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP error {status}: {url}")]
    Status { url: String, status: u16 },
}

/// Fetch-by-identity capability
///
/// Implementations must be shareable across the concurrent fetch tasks.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, identity: &'a str) -> FetchFuture<'a>;
}
