//! Request/response types for enforcement endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::enforce::RiskSignal;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateSessionRequest {
    pub user_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ValidateSessionRequest {
    pub session_id: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct ValidateSessionResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub risk: Vec<RiskSignal>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutRequest {
    pub session_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct InvalidateSessionsRequest {
    pub user_id: String,
    pub trigger: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct InvalidateSessionsResponse {
    pub invalidated: u64,
    pub trigger_recognized: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaCheckRequest {
    pub user_id: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct MfaCheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaFailureRequest {
    pub user_id: String,
    pub ip_address: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaResetRequest {
    pub user_id: String,
}

/// Body returned with 429 responses from the rate limit middleware.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RateLimitedResponse {
    pub message: String,
    pub retry_after_ms: u64,
}
