use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StorageError;

/// Failure to mint an upstream token. Never fatal: the scheduler retries on
/// its next cycle, manual callers get a 502.
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("supervisor token not configured")]
    NotConfigured,

    #[error("issuer request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("issuer rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("issuer returned malformed body (status {status}): {body}")]
    Malformed { status: u16, body: String },
}

impl IssuanceError {
    /// Upstream HTTP status, when the issuer answered at all.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            IssuanceError::Rejected { status, .. } | IssuanceError::Malformed { status, .. } => {
                Some(*status)
            }
            IssuanceError::Transport(e) => e.status().map(|s| s.as_u16()),
            IssuanceError::NotConfigured => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("no token found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("issuance error: {0}")]
    Issuance(#[from] IssuanceError),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({"error": "Unauthorized"})),
            AppError::NotFound => (StatusCode::NOT_FOUND, json!({"error": "No token found"})),
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Failed to persist token"}),
                )
            }
            AppError::Issuance(IssuanceError::NotConfigured) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": "Supervisor token not configured"}),
            ),
            AppError::Issuance(e) => {
                tracing::warn!("Token issuance failed: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    json!({"error": "Failed to renew token", "status": e.upstream_status()}),
                )
            }
            AppError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, json!({"error": msg}))
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "internal server error"}),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::NotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Issuance(IssuanceError::Rejected { status: 403, body: "no".into() })
                .into_response()
                .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Issuance(IssuanceError::NotConfigured).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_upstream_status() {
        let err = IssuanceError::Malformed { status: 200, body: "[]".into() };
        assert_eq!(err.upstream_status(), Some(200));
        assert_eq!(IssuanceError::NotConfigured.upstream_status(), None);
    }
}
