use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid transaction kind: {0}")]
    InvalidKind(String),

    #[error("Invalid payment method: {0}")]
    InvalidPaymentMethod(String),

    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(i64),

    #[error("Invalid stored value: {0}")]
    InvalidStored(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
