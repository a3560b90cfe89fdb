//! Rate limit middleware for the router.
//!
//! Rejections carry a retry hint; admitted responses get advisory
//! `x-ratelimit-*` headers for client-side backoff. The headers are
//! informational only, never load-bearing.

use axum::{
    Json,
    extract::{Extension, Request},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::handlers::EnforcerState;
use super::handlers::types::RateLimitedResponse;
use crate::enforce::{RateLimitDecision, RequestMetadata};

pub async fn rate_limit(
    state: Extension<Arc<EnforcerState>>,
    request: Request,
    next: Next,
) -> Response {
    let metadata = RequestMetadata::from_parts(
        request.headers(),
        request.method(),
        request.uri().path(),
    );
    let decision = state.limiter().check(&metadata).await;

    if !decision.allowed {
        return rejection(&decision);
    }

    let mut response = next.run(request).await;
    if !decision.skipped {
        attach_headers(response.headers_mut(), &decision);
    }
    response
}

/// 429 with a definite, retry-informative body.
fn rejection(decision: &RateLimitDecision) -> Response {
    let retry_after_ms = decision.retry_after_ms.unwrap_or_default();
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_ms.div_ceil(1000)));
    (
        StatusCode::TOO_MANY_REQUESTS,
        headers,
        Json(RateLimitedResponse {
            message: "Rate limit exceeded".to_string(),
            retry_after_ms,
        }),
    )
        .into_response()
}

fn attach_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from(decision.reset_at_ms),
    );
}
