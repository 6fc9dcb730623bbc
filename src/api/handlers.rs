use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::errors::AppError;
use crate::models::credential::{CredentialKind, CredentialRecord};
use crate::AppState;

// ── Response DTOs ────────────────────────────────────────────

#[derive(Serialize)]
pub struct GeneratedTokenResponse {
    pub message: &'static str,
    pub token: String,
}

#[derive(Serialize)]
pub struct RenewedTokenResponse {
    pub message: &'static str,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<i64>,
}

// ── Handlers ─────────────────────────────────────────────────

/// GET /token — the current gateway-auth record.
pub async fn get_token(State(state): State<Arc<AppState>>) -> Result<Json<CredentialRecord>, AppError> {
    state
        .cache
        .current(CredentialKind::GatewayAuth)
        .await
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// POST /generate_token — replace the gateway-auth token. The old token stops
/// working as soon as this returns.
pub async fn generate_token(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GeneratedTokenResponse>, AppError> {
    let record = state
        .cache
        .rotate(CredentialKind::GatewayAuth, || async {
            Ok::<_, AppError>(CredentialRecord::generate())
        })
        .await?;

    Ok(Json(GeneratedTokenResponse {
        message: "New token generated",
        token: record.value,
    }))
}

/// GET /upstream_token — the stored long-lived Home Assistant token.
pub async fn get_upstream_token(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CredentialRecord>, AppError> {
    state
        .cache
        .current(CredentialKind::UpstreamAccess)
        .await
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// POST /upstream_token/renew — issue a new upstream token right away.
pub async fn renew_upstream_token(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RenewedTokenResponse>, AppError> {
    let record = state.renewal.renew_now().await?;
    Ok(Json(RenewedTokenResponse {
        message: "Token renewed",
        token: record.value,
        expiration: record.expiration,
    }))
}

/// GET /entities — Home Assistant entity states, fetched with the supervisor
/// token.
pub async fn get_entities(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let resp = state.upstream_client.fetch_states().await?;
    let status = resp.status();

    if status != StatusCode::OK {
        tracing::warn!(status = status.as_u16(), "failed to fetch entities");
        return Ok((status, Json(json!({"error": "Failed to fetch entities"}))).into_response());
    }

    let entities: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("invalid entity payload: {}", e)))?;
    Ok(Json(entities).into_response())
}
