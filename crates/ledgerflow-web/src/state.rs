use std::sync::Arc;

use ledgerflow_core::Storage;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
}

impl AppState {
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        Ok(Self {
            storage: Arc::new(Storage::open(db_path).await?),
        })
    }
}
