use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_queued))
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    company_id: String,
    #[serde(default = "default_status")]
    status: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_status() -> String {
    "pending".to_string()
}

const fn default_limit() -> u32 {
    100
}

/// Items parked when classification was skipped, wrapped the way pipeline
/// clients expect them.
async fn list_queued(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let transactions = state
        .storage
        .pending_classifications(&query.company_id, &query.status, query.limit)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({ "transactions": transactions })))
}
