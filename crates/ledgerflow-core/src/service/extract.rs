use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::config::ServiceConfig;
use super::retry::RetryPolicy;
use crate::ingest::detect::FileFormat;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Rate limited")]
    RateLimited,
    #[error("Service returned status {0}")]
    Status(u16),
    #[error("Service error: {0}")]
    Remote(String),
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// Transient errors worth retrying: 429, other non-2xx statuses, and
    /// network-level failures. Malformed payloads and explicit remote errors
    /// will not improve on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited | Self::Status(_) => true,
            Self::Http(e) => !e.is_decode(),
            Self::Remote(_) | Self::Malformed(_) => false,
        }
    }
}

/// One record as the extraction service returns it, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    pub date: Option<String>,
    #[serde(alias = "merchant", alias = "name")]
    pub counterparty: Option<String>,
    pub description: Option<String>,
    pub amount: Option<String>,
    #[serde(alias = "type")]
    pub kind: Option<String>,
    pub payment_method: Option<String>,
    pub card_number: Option<String>,
    pub approval_number: Option<String>,
    pub currency: Option<String>,
    pub foreign_amount: Option<String>,
    pub memo: Option<String>,
}

/// Payload for one extraction call: chunk text or base64 file data plus
/// routing context.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    pub data: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<FileFormat>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExtractionResponse {
    Records(Vec<RawRecord>),
    Failure { error: String },
}

/// Extraction seam. Implementations must not fail past this boundary: a
/// request that cannot be served yields an empty record list.
#[async_trait]
pub trait Extract: Send + Sync {
    async fn extract(&self, request: ExtractionRequest) -> Vec<RawRecord>;
}

/// HTTP client for the extraction service.
pub struct ExtractionClient {
    http: reqwest::Client,
    url: String,
    retry: RetryPolicy,
}

impl ExtractionClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(u64::from(config.connect_timeout_seconds)))
            .timeout(Duration::from_secs(u64::from(config.request_timeout_seconds)))
            .build()?;

        Ok(Self {
            http,
            url: config.extraction_url.clone(),
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request_once(&self, request: &ExtractionRequest) -> Result<Vec<RawRecord>, ServiceError> {
        let response = self.http.post(&self.url).json(request).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ServiceError::RateLimited);
        }
        if !status.is_success() {
            return Err(ServiceError::Status(status.as_u16()));
        }

        match response.json::<ExtractionResponse>().await {
            Ok(ExtractionResponse::Records(records)) => Ok(records),
            Ok(ExtractionResponse::Failure { error }) => Err(ServiceError::Remote(error)),
            Err(e) => Err(ServiceError::Malformed(e.to_string())),
        }
    }
}

#[async_trait]
impl Extract for ExtractionClient {
    async fn extract(&self, request: ExtractionRequest) -> Vec<RawRecord> {
        let outcome = self
            .retry
            .run(|| self.request_once(&request), ServiceError::is_transient)
            .await;

        match outcome {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(url = %self.url, "extraction request gave up: {err}");
                Vec::new()
            }
        }
    }
}
