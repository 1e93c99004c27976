//! Remote fetch transport
//!
//! The pipeline only sees the [`Fetcher`] trait: give it an identity, get
//! back a byte stream with its declared length, or an error.

pub mod http;
pub mod types;

pub use http::HttpFetcher;
pub use types::{ByteStream, FetchError, FetchFuture, FetchedBody, Fetcher};
