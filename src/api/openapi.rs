//! OpenAPI document for the enforcement API.

use utoipa::OpenApi;

use super::handlers::{health, mfa, sessions, types};
use crate::enforce::{RiskSignal, SecurityTrigger, Session};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        sessions::create,
        sessions::validate,
        sessions::logout,
        sessions::invalidate,
        mfa::check,
        mfa::record_failure,
        mfa::reset,
    ),
    components(schemas(
        health::Health,
        types::CreateSessionRequest,
        types::ValidateSessionRequest,
        types::ValidateSessionResponse,
        types::LogoutRequest,
        types::InvalidateSessionsRequest,
        types::InvalidateSessionsResponse,
        types::MfaCheckRequest,
        types::MfaCheckResponse,
        types::MfaFailureRequest,
        types::MfaResetRequest,
        types::RateLimitedResponse,
        Session,
        SecurityTrigger,
        RiskSignal,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "sessions", description = "Session lifecycle and trust"),
        (name = "mfa", description = "MFA verification throttling")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::ApiDoc;
    use utoipa::OpenApi;

    #[test]
    fn openapi_document_lists_all_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/health",
            "/v1/sessions",
            "/v1/sessions/validate",
            "/v1/sessions/logout",
            "/v1/sessions/invalidate",
            "/v1/mfa/check",
            "/v1/mfa/failures",
            "/v1/mfa/reset",
        ] {
            assert!(
                paths.iter().any(|path| path.as_str() == expected),
                "missing path {expected}"
            );
        }
    }
}
