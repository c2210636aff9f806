pub mod classify;
pub mod config;
pub mod extract;
pub mod retry;

pub use classify::{
    apply_enrichment, restore_pending, ClassificationClient, Classify, EnrichedRecord,
};
pub use config::ServiceConfig;
pub use extract::{Extract, ExtractionClient, ExtractionRequest, RawRecord, ServiceError};
pub use retry::RetryPolicy;
