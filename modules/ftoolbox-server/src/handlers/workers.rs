use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use ftoolbox_store::workers;

use crate::state::AppState;

/// Overall worker health folded over the registry: any failure wins, then
/// any running worker, otherwise idle.
pub async fn status(State(state): State<AppState>) -> Response {
    let rows = match workers::all_workers(&state.pool).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "Failed to fetch workers");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to fetch worker status"})),
            )
                .into_response();
        }
    };

    let status = if rows.iter().any(|w| w.status == "failed") {
        "failed"
    } else if rows.iter().any(|w| w.status == "running") {
        "running"
    } else {
        "idle"
    };

    Json(json!({"status": status})).into_response()
}
