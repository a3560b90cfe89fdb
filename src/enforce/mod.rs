//! Access-control enforcement core.
//!
//! Flow Overview:
//! 1) Inbound requests are reduced to [`RequestMetadata`] by the HTTP adapter.
//! 2) [`limiter::RateLimiter`] derives a key and admits or rejects against a
//!    windowed counter held in a [`store::RateLimitStore`].
//! 3) Session-bearing requests are validated by [`session::SessionManager`],
//!    which also enforces the per-user concurrency ceiling and reacts to
//!    security triggers.
//! 4) MFA verification attempts are gated by [`mfa::MfaThrottle`] before any
//!    cryptographic comparison happens.
//!
//! Security boundaries:
//! - Counter mutation only happens inside the store; session activation state
//!   only flips inside the session manager.
//! - The rate limiter fails open on store outages; session validation fails
//!   closed. Audit delivery failures never alter a decision.

pub mod audit;
pub mod fingerprint;
pub mod limiter;
pub mod mfa;
pub mod request;
pub mod session;
pub mod store;
pub mod sweep;

pub use audit::{AuditSink, SecurityEvent, Severity, TracingAuditSink};
pub use fingerprint::device_fingerprint;
pub use limiter::{
    KeyStrategy, RateLimitDecision, RateLimitPolicy, RateLimitViolation, RateLimiter, SkipRule,
};
pub use mfa::{MfaDecision, MfaPolicy, MfaThrottle};
pub use request::RequestMetadata;
pub use session::{
    RiskSignal, SecurityTrigger, Session, SessionConfig, SessionManager, SessionValidation,
};
pub use store::{MemoryRateLimitStore, RateLimitEntry, RateLimitStore, StoreError};
pub use sweep::Sweeper;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Configuration rejected at construction time.
///
/// Components refuse to initialize with unusable settings instead of behaving
/// unpredictably at request time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("window duration must be greater than zero")]
    ZeroWindow,
    #[error("session TTL must be greater than zero")]
    ZeroSessionTtl,
    #[error("max concurrent sessions must be greater than zero")]
    ZeroMaxSessions,
    #[error("MFA failure threshold must be greater than zero")]
    ZeroMfaThreshold,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)] // timestamps fit in u64 until year 2554
pub(crate) fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
