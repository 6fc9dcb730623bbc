use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::models::credential::{fingerprint, CredentialKind};
use crate::AppState;

/// Middleware: every request must carry `Authorization: Bearer <gateway token>`.
/// The handler is never reached otherwise.
pub async fn require_gateway_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(provided) = provided else {
        tracing::warn!(method = %req.method(), path = %req.uri().path(), "gateway auth: missing Authorization header");
        return Err(AppError::Unauthorized);
    };

    let authorized = state
        .cache
        .with_current(CredentialKind::GatewayAuth, |current| {
            current.is_some_and(|record| bearer_matches(provided, &record.value))
        })
        .await;

    if authorized {
        Ok(next.run(req).await)
    } else {
        // Never log the presented value itself.
        tracing::warn!(
            method = %req.method(),
            path = %req.uri().path(),
            presented = %fingerprint(provided),
            "gateway auth: invalid token"
        );
        Err(AppError::Unauthorized)
    }
}

/// `header` must be exactly `Bearer <expected>`; compared in constant time.
pub fn bearer_matches(header: &str, expected: &str) -> bool {
    let want = format!("Bearer {}", expected);
    header.as_bytes().ct_eq(want.as_bytes()).into()
}
