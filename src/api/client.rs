use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use super::types::{CatalogPage, ThreadDocument};
use crate::config::Config;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: StatusCode },
    #[error("malformed response from {url}: {message}")]
    Malformed { url: String, message: String },
}

impl ApiError {
    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Transport {
                url: url.to_string(),
                source: e,
            }
        }
    }

    /// Whether the origin answered with a body we could not use.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

/// Thin wrapper over a shared HTTP client bound to the configured origin.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    /// Build the shared HTTP client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(http, config))
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            base_url: config.api_base_url.clone(),
            timeout: config.request_timeout,
        }
    }

    /// The underlying HTTP client, shared with the downloader.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Fetch a board's catalog.
    pub async fn fetch_catalog(&self, board: &str) -> Result<Vec<CatalogPage>, ApiError> {
        let url = format!("{}/{board}/catalog.json", self.base_url);
        self.get_json(&url).await
    }

    /// Fetch a thread's full post list.
    pub async fn fetch_thread(&self, board: &str, thread_no: u64) -> Result<ThreadDocument, ApiError> {
        let url = format!("{}/{board}/thread/{thread_no}.json", self.base_url);
        let doc: ThreadDocument = self.get_json(&url).await?;
        if doc.posts.is_empty() {
            return Err(ApiError::Malformed {
                url,
                message: "thread has no posts".to_string(),
            });
        }
        Ok(doc)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        debug!(url = %url, "Fetching");
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_reqwest(url, e))?;

        serde_json::from_slice(&body).map_err(|e| ApiError::Malformed {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}
