//! HTTP transport over `reqwest`
//!
//! Response bodies are handed over as streams and read lazily; only the time
//! to response headers is bounded, since a body may sit in the hot tier for a
//! while before anyone reads it.

use anyhow::{Context, Result};
use futures::TryStreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio_util::io::StreamReader;
use url::Url;

use super::types::{ByteStream, FetchError, FetchFuture, FetchedBody, Fetcher};
use crate::config::PipelineConfig;

/// Fetches identities as `http`/`https` URLs
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    header_timeout: Duration,
}

impl HttpFetcher {
    /// Build a fetcher with its own client, configured from `config`
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent())
            .connect_timeout(config.fetch_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, config.fetch_timeout()))
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(client: Client, header_timeout: Duration) -> Self {
        Self {
            client,
            header_timeout,
        }
    }

    async fn fetch_url(&self, identity: &str) -> Result<FetchedBody, FetchError> {
        let url = Url::parse(identity).map_err(|e| FetchError::InvalidIdentity {
            identity: identity.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidIdentity {
                identity: identity.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let request = self.client.get(url.clone()).send();
        let response = match tokio::time::timeout(self.header_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    message: format!("no response within {:?}", self.header_timeout),
                });
            }
        };

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let declared_len = response.content_length();
        let stream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        let body: ByteStream = Box::new(StreamReader::new(stream));

        log::debug!("fetched headers for {url} (declared length: {declared_len:?})");
        Ok(FetchedBody { declared_len, body })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, identity: &'a str) -> FetchFuture<'a> {
        Box::pin(self.fetch_url(identity))
    }
}
