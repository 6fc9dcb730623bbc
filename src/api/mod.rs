use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::middleware::{auth::require_gateway_token, headers};
use crate::AppState;

pub mod handlers;

/// Build the gateway router. Every route, the fallback included, sits behind
/// the gateway token check.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/token", get(handlers::get_token))
        .route("/generate_token", post(handlers::generate_token))
        .route("/upstream_token", get(handlers::get_upstream_token))
        .route("/upstream_token/renew", post(handlers::renew_upstream_token))
        .route("/entities", get(handlers::get_entities))
        .fallback(fallback_404)
        .layer(middleware::from_fn_with_state(state.clone(), require_gateway_token))
        // No endpoint takes a meaningful body.
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(middleware::from_fn(headers::security_headers))
        .layer(middleware::from_fn(headers::request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"})))
}
