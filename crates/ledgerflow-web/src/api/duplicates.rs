use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use ledgerflow_core::dedup::{self, DedupOutcome, DuplicateReport};
use serde::Deserialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(preview_duplicates).delete(run_elimination))
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    company_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EliminationRequest {
    company_id: String,
}

async fn preview_duplicates(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<DuplicateReport>, (StatusCode, String)> {
    let report = dedup::preview(&state.storage, &query.company_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(report))
}

async fn run_elimination(
    State(state): State<AppState>,
    Json(request): Json<EliminationRequest>,
) -> Result<Json<DedupOutcome>, (StatusCode, String)> {
    let outcome = dedup::run(&state.storage, &request.company_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(outcome))
}
