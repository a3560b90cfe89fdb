//! Narrow request-metadata interface between the web layer and the core.
//!
//! The HTTP adapter populates [`RequestMetadata`] once per request; everything
//! in the core reads from it instead of reaching into a framework request
//! type. Extraction is side-effect free and never fails: missing headers
//! resolve to `"unknown"` (client IP) or the empty string.

use axum::http::{HeaderMap, Method};
use serde::Serialize;

/// Placeholder used when no client address can be derived.
pub const UNKNOWN_IP: &str = "unknown";

/// Connection and browser metadata for a single request.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RequestMetadata {
    pub ip_address: String,
    pub user_agent: String,
    pub accept_language: String,
    pub accept_encoding: String,
    pub method: String,
    pub path: String,
    /// Authenticated principal, when the caller already knows one.
    pub user_id: Option<String>,
}

impl RequestMetadata {
    /// Extract metadata from request headers plus method and path.
    #[must_use]
    pub fn from_parts(headers: &HeaderMap, method: &Method, path: &str) -> Self {
        Self {
            ip_address: extract_client_ip(headers).unwrap_or_else(|| UNKNOWN_IP.to_string()),
            user_agent: header_value(headers, "user-agent"),
            accept_language: header_value(headers, "accept-language"),
            accept_encoding: header_value(headers, "accept-encoding"),
            method: method.as_str().to_string(),
            path: path.to_string(),
            user_id: None,
        }
    }

    /// Extract metadata when only headers are at hand (session endpoints).
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_client_ip(headers).unwrap_or_else(|| UNKNOWN_IP.to_string()),
            user_agent: header_value(headers, "user-agent"),
            accept_language: header_value(headers, "accept-language"),
            accept_encoding: header_value(headers, "accept-encoding"),
            method: String::new(),
            path: String::new(),
            user_id: None,
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Extract a client IP from common proxy headers.
///
/// Takes the first `X-Forwarded-For` value, falling back to `X-Real-IP`.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}
