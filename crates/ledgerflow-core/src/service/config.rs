use serde::{Deserialize, Serialize};

/// Endpoints for the external extraction and classification services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub extraction_url: String,
    pub classification_url: String,
    pub queue_url: String,
    pub connect_timeout_seconds: u32,
    pub request_timeout_seconds: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            extraction_url: "http://localhost:8920/extract".to_string(),
            classification_url: "http://localhost:8920/classify".to_string(),
            queue_url: "http://localhost:8920/queue".to_string(),
            connect_timeout_seconds: 10,
            request_timeout_seconds: 120,
        }
    }
}

impl ServiceConfig {
    /// Build from `LEDGERFLOW_*_URL` environment variables, falling back to
    /// the local defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            extraction_url: std::env::var("LEDGERFLOW_EXTRACTION_URL")
                .unwrap_or(defaults.extraction_url),
            classification_url: std::env::var("LEDGERFLOW_CLASSIFICATION_URL")
                .unwrap_or(defaults.classification_url),
            queue_url: std::env::var("LEDGERFLOW_QUEUE_URL").unwrap_or(defaults.queue_url),
            ..defaults
        }
    }
}
