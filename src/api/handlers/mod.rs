//! HTTP handlers and the shared enforcement state they operate on.

pub mod health;
pub mod mfa;
pub mod sessions;
pub mod types;

use std::sync::Arc;

use crate::enforce::{
    MemoryRateLimitStore, MfaThrottle, RateLimiter, SessionManager,
};

/// Everything a request needs to be admitted: the rate limiter, the session
/// table, and the MFA throttle. Constructed once at startup and injected via
/// an `Extension` so tests can substitute their own instance.
pub struct EnforcerState {
    limiter: RateLimiter<Arc<MemoryRateLimitStore>>,
    sessions: SessionManager,
    mfa: MfaThrottle,
}

impl EnforcerState {
    #[must_use]
    pub fn new(
        limiter: RateLimiter<Arc<MemoryRateLimitStore>>,
        sessions: SessionManager,
        mfa: MfaThrottle,
    ) -> Self {
        Self {
            limiter,
            sessions,
            mfa,
        }
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter<Arc<MemoryRateLimitStore>> {
        &self.limiter
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn mfa(&self) -> &MfaThrottle {
        &self.mfa
    }
}
