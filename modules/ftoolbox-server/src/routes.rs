use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/tags", get(handlers::tags::list_tags))
        .route("/tags/banned", get(handlers::tags::list_banned))
        .route("/tags/statistics", get(handlers::tags::tag_statistics))
        .route("/tags/related", get(handlers::tags::related_tags))
        .route("/tags/request", post(handlers::tags::request_tag))
        .route("/creators", get(handlers::creators::list_creators))
        .route(
            "/creators/statistics",
            get(handlers::creators::creator_statistics),
        )
        .route("/creators/request", post(handlers::creators::request_creator))
        .route("/workers/status", get(handlers::workers::status))
        .route("/health", get(health));

    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::api_limit::limit_requests,
        ))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}
