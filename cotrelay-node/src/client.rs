use cotrelay_core::QueueMetricsSnapshot;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use thiserror::Error;
use ulid::Ulid;

use crate::api::destinations::{DestinationSummary, ListDestinationsResponse};

/// Error type for status API client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server returned error status {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Resource not found")]
    NotFound,
}

/// HTTP client for a cotrelay node's status API.
#[derive(Clone)]
pub struct Client {
    http: HttpClient,
    base_url: String,
}

impl Client {
    /// Create a new client with the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a new client with a custom reqwest client, e.g. to set
    /// timeouts.
    pub fn with_http_client(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Probe the node's health endpoint.
    pub async fn health(&self) -> Result<(), ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::ServerError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }

    /// List every destination with its queue metrics.
    pub async fn list_destinations(&self) -> Result<Vec<DestinationSummary>, ClientError> {
        let url = format!("{}/api/destinations", self.base_url);
        let response = self.http.get(&url).send().await?;
        let list: ListDestinationsResponse = handle_response(response).await?;
        Ok(list.destinations)
    }

    /// Fetch one destination's queue metrics.
    pub async fn destination_metrics(
        &self,
        id: Ulid,
    ) -> Result<QueueMetricsSnapshot, ClientError> {
        let url = format!("{}/api/destinations/{}/metrics", self.base_url, id);
        let response = self.http.get(&url).send().await?;
        handle_response(response).await
    }
}

async fn handle_response<T>(response: reqwest::Response) -> Result<T, ClientError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();

    if status.is_success() {
        Ok(response.json().await?)
    } else if status == reqwest::StatusCode::NOT_FOUND {
        Err(ClientError::NotFound)
    } else {
        let message = response.text().await.unwrap_or_default();
        Err(ClientError::ServerError {
            status: status.as_u16(),
            message,
        })
    }
}
