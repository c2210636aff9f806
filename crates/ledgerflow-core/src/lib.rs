pub mod dedup;
pub mod error;
pub mod ingest;
pub mod recon;
pub mod service;
pub mod storage;
pub mod transaction;

pub use error::{Error, Result};
pub use ingest::{
    FileFormat, InputFile, Normalizer, PipelineBuilder, PipelineHandle, PipelineState, Progress,
};
pub use recon::CancelLink;
pub use service::{
    restore_pending, ClassificationClient, Classify, Extract, ExtractionClient, RetryPolicy,
    ServiceConfig,
};
pub use storage::Storage;
pub use transaction::{
    CardRegistration, Classification, Currency, PaymentMethod, Transaction, TxnKind, UNCLASSIFIED,
};
