use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

use crate::transaction::{CardRegistration, Transaction};
use crate::{Error, Result};

const INIT_SQL: &str = r"
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    company_id TEXT NOT NULL,
    transaction_date TEXT NOT NULL,
    kind TEXT NOT NULL,
    counterparty TEXT NOT NULL,
    description TEXT NOT NULL,
    amount REAL NOT NULL,
    payment_method TEXT NOT NULL,
    category TEXT NOT NULL,
    related_id INTEGER,
    related_type TEXT,
    status TEXT,
    card_number TEXT,
    card_id INTEGER,
    approval_number TEXT,
    is_cancelled INTEGER NOT NULL DEFAULT 0,
    cancel_pair_id INTEGER,
    classification TEXT NOT NULL,
    currency TEXT NOT NULL,
    original_amount REAL,
    is_converted INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_txn_company ON transactions(company_id);
CREATE INDEX IF NOT EXISTS idx_txn_dedup
    ON transactions(transaction_date, counterparty, amount, payment_method);

CREATE TABLE IF NOT EXISTS card_registrations (
    last4 TEXT PRIMARY KEY,
    card_number TEXT NOT NULL,
    holder TEXT,
    issuer TEXT,
    expiry TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS classification_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_company_status
    ON classification_queue(company_id, status);
";

const TXN_COLUMNS: &str = "id, company_id, transaction_date, kind, counterparty, description, \
     amount, payment_method, category, related_id, related_type, status, card_number, card_id, \
     approval_number, is_cancelled, cancel_pair_id, classification, currency, original_amount, \
     is_converted, created_at";

pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn open(path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{path}?mode=rwc"))
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    // Transaction operations

    pub async fn insert_transactions(
        &self,
        company_id: &str,
        txns: &[Transaction],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for txn in txns {
            let classification = serde_json::to_string(&txn.classification)?;

            sqlx::query(
                "INSERT INTO transactions (id, company_id, transaction_date, kind, counterparty, \
                 description, amount, payment_method, category, related_id, related_type, status, \
                 card_number, card_id, approval_number, is_cancelled, cancel_pair_id, \
                 classification, currency, original_amount, is_converted, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(txn.id)
            .bind(company_id)
            .bind(txn.transaction_date.to_string())
            .bind(txn.kind.as_str())
            .bind(&txn.counterparty)
            .bind(&txn.description)
            .bind(txn.amount)
            .bind(txn.payment_method.as_str())
            .bind(&txn.category)
            .bind(txn.related_id)
            .bind(&txn.related_type)
            .bind(&txn.status)
            .bind(&txn.card_number)
            .bind(txn.card_id)
            .bind(&txn.approval_number)
            .bind(txn.is_cancelled)
            .bind(txn.cancel_pair_id)
            .bind(classification)
            .bind(txn.currency.as_str())
            .bind(txn.original_amount)
            .bind(txn.is_converted)
            .bind(txn.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_transactions(&self, company_id: &str) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TXN_COLUMNS} FROM transactions WHERE company_id = ? ORDER BY created_at, id"
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transaction).collect()
    }

    pub async fn count_transactions(&self, company_id: &str) -> Result<u64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE company_id = ?")
                .bind(company_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.0.unsigned_abs())
    }

    /// Write back the fields reconciliation may touch on an existing row.
    pub async fn update_reconciled(&self, txn: &Transaction) -> Result<()> {
        let result = sqlx::query(
            "UPDATE transactions SET category = ?, is_cancelled = ?, cancel_pair_id = ?, \
             card_id = ?, related_type = ?, related_id = ? WHERE id = ?",
        )
        .bind(&txn.category)
        .bind(txn.is_cancelled)
        .bind(txn.cancel_pair_id)
        .bind(txn.card_id)
        .bind(&txn.related_type)
        .bind(txn.related_id)
        .bind(txn.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::TransactionNotFound(txn.id));
        }
        Ok(())
    }

    /// Write back the fields a late classification pass may fill in.
    pub async fn update_classification(&self, txn: &Transaction) -> Result<()> {
        let classification = serde_json::to_string(&txn.classification)?;

        let result = sqlx::query(
            "UPDATE transactions SET category = ?, classification = ?, related_id = ?, \
             related_type = ?, status = ?, card_id = ? WHERE id = ?",
        )
        .bind(&txn.category)
        .bind(classification)
        .bind(txn.related_id)
        .bind(&txn.related_type)
        .bind(&txn.status)
        .bind(txn.card_id)
        .bind(txn.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::TransactionNotFound(txn.id));
        }
        Ok(())
    }

    pub async fn delete_transactions(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM transactions WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    // Card registration operations

    pub async fn upsert_registration(&self, registration: &CardRegistration) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO card_registrations (last4, card_number, holder, issuer, expiry, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(last4) DO UPDATE SET card_number = excluded.card_number, \
             holder = excluded.holder, issuer = excluded.issuer, expiry = excluded.expiry, \
             updated_at = excluded.updated_at",
        )
        .bind(&registration.last4)
        .bind(&registration.card_number)
        .bind(&registration.holder)
        .bind(&registration.issuer)
        .bind(&registration.expiry)
        .bind(registration.created_at.to_rfc3339())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_registrations(&self) -> Result<Vec<CardRegistration>> {
        let rows = sqlx::query(
            "SELECT last4, card_number, holder, issuer, expiry, created_at \
             FROM card_registrations ORDER BY last4",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CardRegistration {
                    last4: row.try_get("last4")?,
                    card_number: row.try_get("card_number")?,
                    holder: row.try_get("holder")?,
                    issuer: row.try_get("issuer")?,
                    expiry: row.try_get("expiry")?,
                    created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }

    // Classification queue operations

    pub async fn enqueue_classification(
        &self,
        company_id: &str,
        txn: &Transaction,
    ) -> Result<()> {
        let payload = serde_json::to_string(txn)?;

        sqlx::query(
            "INSERT INTO classification_queue (company_id, status, payload, created_at) \
             VALUES (?, 'pending', ?, ?)",
        )
        .bind(company_id)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn pending_classifications(
        &self,
        company_id: &str,
        status: &str,
        limit: u32,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT payload FROM classification_queue \
             WHERE company_id = ? AND status = ? ORDER BY id LIMIT ?",
        )
        .bind(company_id)
        .bind(status)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect()
    }

    pub async fn mark_classifications_done(&self, company_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE classification_queue SET status = 'done' \
             WHERE company_id = ? AND status = 'pending'",
        )
        .bind(company_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidStored(format!("timestamp {raw:?}: {e}")))
}

fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Result<Transaction> {
    let date_raw: String = row.try_get("transaction_date")?;
    let transaction_date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d")
        .map_err(|e| Error::InvalidStored(format!("date {date_raw:?}: {e}")))?;

    let kind: String = row.try_get("kind")?;
    let payment_method: String = row.try_get("payment_method")?;
    let currency: String = row.try_get("currency")?;
    let classification: String = row.try_get("classification")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Transaction {
        id: row.try_get("id")?,
        transaction_date,
        kind: kind.parse()?,
        counterparty: row.try_get("counterparty")?,
        description: row.try_get("description")?,
        amount: row.try_get("amount")?,
        payment_method: payment_method.parse()?,
        category: row.try_get("category")?,
        related_id: row.try_get("related_id")?,
        related_type: row.try_get("related_type")?,
        status: row.try_get("status")?,
        card_number: row.try_get("card_number")?,
        card_id: row.try_get("card_id")?,
        approval_number: row.try_get("approval_number")?,
        is_cancelled: row.try_get("is_cancelled")?,
        cancel_pair_id: row.try_get("cancel_pair_id")?,
        classification: serde_json::from_str(&classification)?,
        currency: currency.parse()?,
        original_amount: row.try_get("original_amount")?,
        is_converted: row.try_get("is_converted")?,
        created_at: parse_timestamp(&created_at)?,
    })
}
