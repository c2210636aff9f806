mod duplicates;
mod queue;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/duplicates", duplicates::router())
        .nest("/queue", queue::router())
}
