//! Session endpoints for the authentication layer.
//!
//! Invalid sessions always yield the same generic response: expiry, logout,
//! and bulk invalidation are indistinguishable from the outside so account
//! security events cannot be enumerated.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error};

use super::EnforcerState;
use super::types::{
    CreateSessionRequest, InvalidateSessionsRequest, InvalidateSessionsResponse, LogoutRequest,
    ValidateSessionRequest, ValidateSessionResponse,
};
use crate::enforce::{RequestMetadata, SecurityTrigger, Session};

#[utoipa::path(
    post,
    path = "/v1/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = Session),
        (status = 400, description = "Missing payload or user id", body = String),
        (status = 500, description = "Session creation failed")
    ),
    tag = "sessions"
)]
pub async fn create(
    headers: HeaderMap,
    state: Extension<Arc<EnforcerState>>,
    payload: Option<Json<CreateSessionRequest>>,
) -> impl IntoResponse {
    let request: CreateSessionRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let user_id = request.user_id.trim();
    if user_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing user id".to_string()).into_response();
    }

    let metadata = RequestMetadata::from_headers(&headers);
    match state.sessions().create_session(user_id, &metadata) {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(err) => {
            error!("Failed to create session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/sessions/validate",
    request_body = ValidateSessionRequest,
    responses(
        (status = 200, description = "Validation outcome", body = ValidateSessionResponse),
        (status = 400, description = "Missing payload", body = String)
    ),
    tag = "sessions"
)]
pub async fn validate(
    headers: HeaderMap,
    state: Extension<Arc<EnforcerState>>,
    payload: Option<Json<ValidateSessionRequest>>,
) -> impl IntoResponse {
    let request: ValidateSessionRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let metadata = RequestMetadata::from_headers(&headers);
    let validation = state
        .sessions()
        .validate_session(request.session_id.trim(), &metadata);

    let response = ValidateSessionResponse {
        valid: validation.valid,
        user_id: validation.user_id,
        risk: validation.risk,
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/sessions/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "sessions"
)]
pub async fn logout(
    state: Extension<Arc<EnforcerState>>,
    payload: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    // Logout is idempotent; an unknown token still gets a 204.
    if let Some(Json(request)) = payload {
        state.sessions().logout(request.session_id.trim());
    }
    StatusCode::NO_CONTENT.into_response()
}

#[utoipa::path(
    post,
    path = "/v1/sessions/invalidate",
    request_body = InvalidateSessionsRequest,
    responses(
        (status = 200, description = "Invalidation outcome", body = InvalidateSessionsResponse),
        (status = 400, description = "Missing payload", body = String)
    ),
    tag = "sessions"
)]
pub async fn invalidate(
    state: Extension<Arc<EnforcerState>>,
    payload: Option<Json<InvalidateSessionsRequest>>,
) -> impl IntoResponse {
    let request: InvalidateSessionsRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    // Unrecognized triggers never coerce into an invalidation.
    let Some(trigger) = SecurityTrigger::parse(request.trigger.trim()) else {
        debug!(trigger = %request.trigger, "ignoring unrecognized security trigger");
        return (
            StatusCode::OK,
            Json(InvalidateSessionsResponse {
                invalidated: 0,
                trigger_recognized: false,
            }),
        )
            .into_response();
    };

    let invalidated = state
        .sessions()
        .invalidate_all_sessions(request.user_id.trim(), trigger);
    (
        StatusCode::OK,
        Json(InvalidateSessionsResponse {
            invalidated: invalidated as u64,
            trigger_recognized: true,
        }),
    )
        .into_response()
}
