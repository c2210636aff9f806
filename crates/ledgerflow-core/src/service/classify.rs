use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::config::ServiceConfig;
use super::extract::ServiceError;
use super::retry::RetryPolicy;
use crate::storage::Storage;
use crate::transaction::{Classification, Transaction};

/// Enrichment for one transaction, index-aligned with the request batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichedRecord {
    pub category: Option<String>,
    pub matched_schedule_id: Option<i64>,
    pub matched_contract_name: Option<String>,
    pub matched_employee_id: Option<i64>,
    pub matched_employee_name: Option<String>,
    pub confidence: Option<f64>,
    #[serde(alias = "classification_tier")]
    pub tier: Option<String>,
    pub alternatives: Vec<String>,
    pub related_id: Option<i64>,
    pub related_type: Option<String>,
    pub status: Option<String>,
    pub card_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ClassificationRequest<'a> {
    transactions: &'a [Transaction],
    company_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    transactions: Vec<EnrichedRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueueResponse {
    Wrapped { transactions: Vec<Transaction> },
    Plain(Vec<Transaction>),
}

/// Classification seam. `None` means the whole batch was skipped; callers
/// leave the default category in place.
#[async_trait]
pub trait Classify: Send + Sync {
    async fn classify(&self, batch: &[Transaction], company_id: &str)
        -> Option<Vec<EnrichedRecord>>;

    /// Rehydrate classification items queued before a session restart.
    async fn restore_queue(&self, company_id: &str, status: &str, limit: u32)
        -> Vec<Transaction>;
}

/// Merge enrichment into a batch, by position. The two slices must be the
/// same request/response pair; extra records on either side are ignored.
pub fn apply_enrichment(batch: &mut [Transaction], enriched: &[EnrichedRecord]) {
    for (txn, record) in batch.iter_mut().zip(enriched) {
        if let Some(category) = record.category.as_deref() {
            if !category.trim().is_empty() {
                txn.category = category.to_string();
            }
        }
        txn.classification = Classification {
            matched_schedule_id: record.matched_schedule_id,
            matched_contract_name: record.matched_contract_name.clone(),
            matched_employee_id: record.matched_employee_id,
            matched_employee_name: record.matched_employee_name.clone(),
            confidence: record.confidence,
            tier: record.tier.clone(),
            alternatives: record.alternatives.clone(),
        };
        if record.related_id.is_some() {
            txn.related_id = record.related_id;
        }
        if let Some(related_type) = record.related_type.clone() {
            txn.related_type = Some(related_type);
        }
        if let Some(status) = record.status.clone() {
            txn.status = Some(status);
        }
        if record.card_id.is_some() {
            txn.card_id = record.card_id;
        }
    }
}

/// Drain the classification backlog left by earlier sessions: rehydrate
/// the parked rows, classify them in one batch, write the enrichment back
/// to their stored transactions, and mark the queue entries done. Returns
/// how many rows were reclassified; a skipped batch leaves the queue
/// pending for the next attempt.
pub async fn restore_pending(
    classifier: &dyn Classify,
    storage: &Storage,
    company_id: &str,
    limit: u32,
) -> crate::Result<usize> {
    let mut parked = classifier.restore_queue(company_id, "pending", limit).await;
    if parked.is_empty() {
        return Ok(0);
    }

    let Some(enriched) = classifier.classify(&parked, company_id).await else {
        tracing::warn!(company_id, rows = parked.len(), "queue restore deferred");
        return Ok(0);
    };
    apply_enrichment(&mut parked, &enriched);

    for txn in &parked {
        if let Err(err) = storage.update_classification(txn).await {
            tracing::warn!(id = txn.id, "restored classification not persisted: {err}");
        }
    }
    storage.mark_classifications_done(company_id).await?;

    tracing::info!(company_id, rows = parked.len(), "classification queue drained");
    Ok(parked.len())
}

/// HTTP client for the classification service and its restore queue.
pub struct ClassificationClient {
    http: reqwest::Client,
    url: String,
    queue_url: String,
    retry: RetryPolicy,
}

impl ClassificationClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(u64::from(config.connect_timeout_seconds)))
            .timeout(Duration::from_secs(u64::from(config.request_timeout_seconds)))
            .build()?;

        Ok(Self {
            http,
            url: config.classification_url.clone(),
            queue_url: config.queue_url.clone(),
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request_once(
        &self,
        batch: &[Transaction],
        company_id: &str,
    ) -> Result<Vec<EnrichedRecord>, ServiceError> {
        let request = ClassificationRequest {
            transactions: batch,
            company_id,
        };
        let response = self.http.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ServiceError::RateLimited);
        }
        if !status.is_success() {
            return Err(ServiceError::Status(status.as_u16()));
        }

        response
            .json::<ClassificationResponse>()
            .await
            .map(|r| r.transactions)
            .map_err(|e| ServiceError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Classify for ClassificationClient {
    async fn classify(
        &self,
        batch: &[Transaction],
        company_id: &str,
    ) -> Option<Vec<EnrichedRecord>> {
        if batch.is_empty() {
            return Some(Vec::new());
        }

        let outcome = self
            .retry
            .run(
                || self.request_once(batch, company_id),
                ServiceError::is_transient,
            )
            .await;

        match outcome {
            Ok(records) => Some(records),
            Err(err) => {
                // Skipped entirely; the batch keeps its default category.
                tracing::warn!(url = %self.url, "classification skipped: {err}");
                None
            }
        }
    }

    async fn restore_queue(&self, company_id: &str, status: &str, limit: u32) -> Vec<Transaction> {
        let request = self
            .http
            .get(&self.queue_url)
            .query(&[
                ("company_id", company_id),
                ("status", status),
                ("limit", &limit.to_string()),
            ])
            .send();

        let response = match request.await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!(status = r.status().as_u16(), "queue restore skipped");
                return Vec::new();
            }
            Err(err) => {
                tracing::warn!("queue restore skipped: {err}");
                return Vec::new();
            }
        };

        match response.json::<QueueResponse>().await {
            Ok(QueueResponse::Wrapped { transactions }) | Ok(QueueResponse::Plain(transactions)) => {
                transactions
            }
            Err(err) => {
                tracing::warn!("queue restore payload unreadable: {err}");
                Vec::new()
            }
        }
    }
}
