//! HTTP retrieval of source photos

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// Result of fetching one source URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Body of a 2xx response
    Fetched(Vec<u8>),
    /// Non-2xx status; the source should be forgotten
    Gone { status: u16 },
}

/// Fetches raw photo bytes by URL
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// # Errors
    /// Transport failures (DNS, connection, timeout, body read).
    /// A non-2xx status is not an error.
    async fn fetch(&self, url: &str) -> Result<FetchOutcome>;
}

/// `ImageSource` over `reqwest`
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    /// # Errors
    /// - HTTP client construction failures
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::network_error("Failed to create HTTP client", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<FetchOutcome> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::network_error(format!("GET {}", url), e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "Source answered with non-success status");
            return Ok(FetchOutcome::Gone {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::network_error(format!("Reading body of {}", url), e))?;
        debug!(size = bytes.len(), "Source fetched");
        Ok(FetchOutcome::Fetched(bytes.to_vec()))
    }
}
