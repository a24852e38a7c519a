//! HTTP adapter for the external seed dataset.
//!
//! Owns transport details only: request timeout, HTTP status mapping, and
//! JSON decoding into raw entries. Whether an entry is usable is decided by
//! the synchronizer's mapping step, not here.

use std::time::Duration;

use application::{ApplicationError, PostSource, RawPost};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

/// The dataset the original deployment seeds from.
pub const DEFAULT_SEED_URL: &str = "https://jsonplaceholder.typicode.com/posts";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Seed source that performs one GET against a JSONPlaceholder-shaped endpoint.
pub struct JsonPlaceholderSource {
    client: Client,
    url: String,
}

impl JsonPlaceholderSource {
    /// Builds an adapter with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    /// Builds an adapter with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn with_timeout(
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PostSource for JsonPlaceholderSource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch_posts(&self) -> Result<Vec<RawPost>, ApplicationError> {
        debug!("Fetching seed dataset");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApplicationError::SourceUnavailable(format!(
                "Seed endpoint returned {}",
                status
            )));
        }

        let raw: Vec<RawPost> = response.json().await.map_err(|e| {
            ApplicationError::SourceUnavailable(format!("Undecodable seed payload: {}", e))
        })?;
        debug!(count = raw.len(), "Seed dataset fetched");
        Ok(raw)
    }
}

fn map_transport_error(err: reqwest::Error) -> ApplicationError {
    ApplicationError::SourceUnavailable(err.to_string())
}
