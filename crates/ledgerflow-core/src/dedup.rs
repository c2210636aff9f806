use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::Storage;
use crate::transaction::Transaction;
use crate::Result;

/// Rows deleted per statement; a failed batch is logged and skipped.
pub const DELETE_BATCH: usize = 50;

/// Sample groups returned by the preview.
pub const SAMPLE_CAP: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateSample {
    pub key: String,
    pub kept_id: i64,
    pub duplicate_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub total_transactions: usize,
    pub duplicate_count: usize,
    pub group_count: usize,
    pub duplicate_ids: Vec<i64>,
    pub samples: Vec<DuplicateSample>,
}

/// Partial-success summary of a deletion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupOutcome {
    pub deleted: u64,
    pub remaining: u64,
}

/// Group persisted transactions by the exact dedup tuple
/// (date, counterparty, amount, payment method). Within a group the earliest
/// `created_at` survives; everything after it is a duplicate.
fn duplicate_groups(txns: &[Transaction]) -> Vec<(String, Vec<&Transaction>)> {
    let mut by_key: BTreeMap<String, Vec<&Transaction>> = BTreeMap::new();
    for txn in txns {
        by_key.entry(txn.dedup_key()).or_default().push(txn);
    }

    by_key
        .into_iter()
        .filter(|(_, group)| group.len() > 1)
        .map(|(key, mut group)| {
            group.sort_by_key(|t| (t.created_at, t.id));
            (key, group)
        })
        .collect()
}

fn doomed_ids(groups: &[(String, Vec<&Transaction>)]) -> Vec<i64> {
    groups
        .iter()
        .flat_map(|(_, group)| group.iter().skip(1).map(|t| t.id))
        .collect()
}

/// Read-only duplicate scan.
pub async fn preview(storage: &Storage, company_id: &str) -> Result<DuplicateReport> {
    let txns = storage.list_transactions(company_id).await?;
    let groups = duplicate_groups(&txns);
    let duplicate_ids = doomed_ids(&groups);

    let samples = groups
        .iter()
        .take(SAMPLE_CAP)
        .map(|(key, group)| DuplicateSample {
            key: key.clone(),
            kept_id: group[0].id,
            duplicate_ids: group.iter().skip(1).map(|t| t.id).collect(),
        })
        .collect();

    Ok(DuplicateReport {
        total_transactions: txns.len(),
        duplicate_count: duplicate_ids.len(),
        group_count: groups.len(),
        duplicate_ids,
        samples,
    })
}

/// Delete every duplicate, keeping the earliest row per group. Batches that
/// fail are logged and skipped; the job reports what it actually removed.
pub async fn run(storage: &Storage, company_id: &str) -> Result<DedupOutcome> {
    let txns = storage.list_transactions(company_id).await?;
    let groups = duplicate_groups(&txns);
    let doomed = doomed_ids(&groups);

    tracing::info!(
        company_id,
        groups = groups.len(),
        duplicates = doomed.len(),
        "starting duplicate elimination"
    );

    let mut deleted = 0u64;
    for batch in doomed.chunks(DELETE_BATCH) {
        match storage.delete_transactions(batch).await {
            Ok(n) => deleted += n,
            Err(err) => {
                tracing::warn!(batch_len = batch.len(), "delete batch failed: {err}");
            }
        }
    }

    let remaining = storage.count_transactions(company_id).await?;
    Ok(DedupOutcome { deleted, remaining })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{PaymentMethod, TxnKind};
    use chrono::{Duration, NaiveDate, Utc};

    fn txn(id: i64, counterparty: &str, amount: f64, minutes_old: i64) -> Transaction {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let mut t = Transaction::new(id, date, TxnKind::Expense, amount)
            .with_counterparty(counterparty)
            .with_payment_method(PaymentMethod::Card);
        t.created_at = Utc::now() - Duration::minutes(minutes_old);
        t
    }

    #[test]
    fn marks_all_but_earliest_in_a_group() {
        let txns = vec![
            txn(1, "Coffee Shop", 4500.0, 30),
            txn(2, "Coffee Shop", 4500.0, 20),
            txn(3, "Coffee Shop", 4500.0, 10),
        ];

        let groups = duplicate_groups(&txns);
        assert_eq!(groups.len(), 1);
        assert_eq!(doomed_ids(&groups), vec![2, 3]);
    }

    #[test]
    fn any_differing_field_splits_the_group() {
        let mut other_method = txn(2, "Coffee Shop", 4500.0, 20);
        other_method.payment_method = PaymentMethod::Bank;

        let txns = vec![
            txn(1, "Coffee Shop", 4500.0, 30),
            other_method,
            txn(3, "Coffee Shop", 4600.0, 10),
            txn(4, "Tea House", 4500.0, 5),
        ];

        assert!(duplicate_groups(&txns).is_empty());
    }

    #[tokio::test]
    async fn preview_reports_without_deleting() {
        let storage = Storage::open_memory().await.unwrap();
        storage
            .insert_transactions(
                "acme",
                &[
                    txn(1, "Coffee Shop", 4500.0, 30),
                    txn(2, "Coffee Shop", 4500.0, 20),
                    txn(3, "Tea House", 9000.0, 10),
                ],
            )
            .await
            .unwrap();

        let report = preview(&storage, "acme").await.unwrap();

        assert_eq!(report.total_transactions, 3);
        assert_eq!(report.duplicate_count, 1);
        assert_eq!(report.group_count, 1);
        assert_eq!(report.duplicate_ids, vec![2]);
        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.samples[0].kept_id, 1);
        assert_eq!(storage.count_transactions("acme").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn run_deletes_later_duplicates() {
        let storage = Storage::open_memory().await.unwrap();
        storage
            .insert_transactions(
                "acme",
                &[
                    txn(1, "Coffee Shop", 4500.0, 30),
                    txn(2, "Coffee Shop", 4500.0, 20),
                    txn(3, "Coffee Shop", 4500.0, 10),
                    txn(4, "Tea House", 9000.0, 5),
                ],
            )
            .await
            .unwrap();

        let outcome = run(&storage, "acme").await.unwrap();

        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.remaining, 2);

        let survivors: Vec<i64> = storage
            .list_transactions("acme")
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(survivors, vec![1, 4]);
    }

    #[tokio::test]
    async fn run_with_many_duplicates_uses_batches() {
        let storage = Storage::open_memory().await.unwrap();

        let mut txns = Vec::new();
        for i in 0..120 {
            txns.push(txn(i, "Coffee Shop", 4500.0, 200 - i));
        }
        storage.insert_transactions("acme", &txns).await.unwrap();

        let outcome = run(&storage, "acme").await.unwrap();

        assert_eq!(outcome.deleted, 119);
        assert_eq!(outcome.remaining, 1);
    }
}
