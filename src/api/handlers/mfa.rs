//! MFA throttle endpoints for the verifier.
//!
//! The verifier checks the limit before attempting a TOTP/backup-code
//! comparison, then reports the outcome. Recording and deciding stay
//! separate so locked-out accounts never reach the comparison at all.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use super::EnforcerState;
use super::types::{MfaCheckRequest, MfaCheckResponse, MfaFailureRequest, MfaResetRequest};
use crate::enforce::RequestMetadata;

#[utoipa::path(
    post,
    path = "/v1/mfa/check",
    request_body = MfaCheckRequest,
    responses(
        (status = 200, description = "Throttle decision", body = MfaCheckResponse),
        (status = 400, description = "Missing payload", body = String)
    ),
    tag = "mfa"
)]
pub async fn check(
    state: Extension<Arc<EnforcerState>>,
    payload: Option<Json<MfaCheckRequest>>,
) -> impl IntoResponse {
    let request: MfaCheckRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let decision = state.mfa().check(request.user_id.trim());
    (
        StatusCode::OK,
        Json(MfaCheckResponse {
            allowed: decision.allowed,
            retry_after_ms: decision.retry_after_ms,
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/mfa/failures",
    request_body = MfaFailureRequest,
    responses(
        (status = 204, description = "Failure recorded"),
        (status = 400, description = "Missing payload", body = String)
    ),
    tag = "mfa"
)]
pub async fn record_failure(
    headers: HeaderMap,
    state: Extension<Arc<EnforcerState>>,
    payload: Option<Json<MfaFailureRequest>>,
) -> impl IntoResponse {
    let request: MfaFailureRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    // Prefer the verifier-supplied address; fall back to proxy headers.
    let ip_address = request
        .ip_address
        .filter(|ip| !ip.trim().is_empty())
        .unwrap_or_else(|| RequestMetadata::from_headers(&headers).ip_address);
    state
        .mfa()
        .record_failure(request.user_id.trim(), ip_address.trim());
    StatusCode::NO_CONTENT.into_response()
}

#[utoipa::path(
    post,
    path = "/v1/mfa/reset",
    request_body = MfaResetRequest,
    responses(
        (status = 204, description = "Failure count cleared"),
        (status = 400, description = "Missing payload", body = String)
    ),
    tag = "mfa"
)]
pub async fn reset(
    state: Extension<Arc<EnforcerState>>,
    payload: Option<Json<MfaResetRequest>>,
) -> impl IntoResponse {
    let request: MfaResetRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    state.mfa().reset(request.user_id.trim());
    StatusCode::NO_CONTENT.into_response()
}
