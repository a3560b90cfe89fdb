//! MFA verification throttling.
//!
//! Tracks failed one-time-code attempts per principal over a trailing
//! window and locks further verification once the threshold is reached,
//! regardless of whether the next submitted code would have been valid.
//!
//! Recording and deciding are separate so the caller can check the limit
//! before attempting verification and skip the cryptographic comparison for
//! an already-locked-out account. Only an explicit reset (successful
//! verification) restores the full budget; records otherwise age out of the
//! trailing window individually.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::warn;

use super::audit::{AuditSink, SecurityEvent, Severity, TracingAuditSink, emit_guarded};
use super::{ConfigError, unix_ms};

const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_MAX_FAILURES: u32 = 5;

/// Throttle configuration, validated at construction.
#[derive(Clone, Debug)]
pub struct MfaPolicy {
    window: Duration,
    max_failures: u32,
}

impl MfaPolicy {
    pub fn new(window: Duration, max_failures: u32) -> Result<Self, ConfigError> {
        if window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        if max_failures == 0 {
            return Err(ConfigError::ZeroMfaThreshold);
        }
        Ok(Self {
            window,
            max_failures,
        })
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }
}

impl Default for MfaPolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

/// Whether a verification attempt may proceed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MfaDecision {
    pub allowed: bool,
    /// When locked out: the timestamp after which attempts may resume.
    pub retry_after_ms: Option<u64>,
}

#[derive(Clone, Debug)]
struct MfaFailureRecord {
    ip_address: String,
    at_ms: u64,
}

/// Per-principal failed-attempt tracker.
pub struct MfaThrottle {
    policy: MfaPolicy,
    records: RwLock<HashMap<String, Vec<MfaFailureRecord>>>,
    sink: Arc<dyn AuditSink>,
}

impl MfaThrottle {
    #[must_use]
    pub fn new(policy: MfaPolicy) -> Self {
        Self {
            policy,
            records: RwLock::new(HashMap::new()),
            sink: Arc::new(TracingAuditSink),
        }
    }

    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &MfaPolicy {
        &self.policy
    }

    /// Decide whether `user_id` may attempt verification right now.
    #[must_use]
    pub fn check(&self, user_id: &str) -> MfaDecision {
        let now = unix_ms();
        #[allow(clippy::cast_possible_truncation)]
        let window_ms = self.policy.window.as_millis() as u64;
        let cutoff = now.saturating_sub(window_ms);

        let failures = {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            records.get(user_id).map_or(0, |entries| {
                entries.iter().filter(|record| record.at_ms > cutoff).count()
            })
        };

        if failures >= self.policy.max_failures as usize {
            warn!(
                user_id,
                failures,
                max_failures = self.policy.max_failures,
                "MFA verification locked out"
            );
            emit_guarded(
                &self.sink,
                SecurityEvent::new("mfa_lockout", Severity::Warning)
                    .with_user_id(user_id)
                    .with_details(serde_json::json!({
                        "failures": failures,
                        "window_ms": window_ms,
                    })),
            );
            return MfaDecision {
                allowed: false,
                retry_after_ms: Some(now + window_ms),
            };
        }

        MfaDecision {
            allowed: true,
            retry_after_ms: None,
        }
    }

    /// Record a failed verification attempt. Does not enforce the limit.
    pub fn record_failure(&self, user_id: &str, ip_address: &str) {
        self.record_failure_at(user_id, ip_address, unix_ms());
    }

    pub(crate) fn record_failure_at(&self, user_id: &str, ip_address: &str, at_ms: u64) {
        #[allow(clippy::cast_possible_truncation)]
        let window_ms = self.policy.window.as_millis() as u64;
        let cutoff = unix_ms().saturating_sub(window_ms);

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let entries = records.entry(user_id.to_string()).or_default();
        // Aged-out records no longer influence any decision; drop them here
        // to bound per-user memory.
        entries.retain(|record| record.at_ms > cutoff);
        entries.push(MfaFailureRecord {
            ip_address: ip_address.to_string(),
            at_ms,
        });
    }

    /// Clear all failure records for `user_id`, restoring the full budget.
    /// Called on successful verification.
    pub fn reset(&self, user_id: &str) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.remove(user_id);
    }

    /// Failure count currently inside the trailing window.
    #[must_use]
    pub fn failure_count(&self, user_id: &str) -> usize {
        let cutoff = {
            #[allow(clippy::cast_possible_truncation)]
            let window_ms = self.policy.window.as_millis() as u64;
            unix_ms().saturating_sub(window_ms)
        };
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(user_id).map_or(0, |entries| {
            entries.iter().filter(|record| record.at_ms > cutoff).count()
        })
    }

    /// Most recent source addresses for a user's failures, for audit use.
    #[must_use]
    pub fn failure_sources(&self, user_id: &str) -> Vec<String> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(user_id).map_or_else(Vec::new, |entries| {
            entries
                .iter()
                .map(|record| record.ip_address.clone())
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforce::audit::NoopAuditSink;

    fn throttle() -> MfaThrottle {
        MfaThrottle::new(MfaPolicy::default()).with_audit_sink(Arc::new(NoopAuditSink))
    }

    #[test]
    fn policy_defaults_match_lockout_rules() {
        let policy = MfaPolicy::default();
        assert_eq!(policy.window(), Duration::from_secs(900));
        assert_eq!(policy.max_failures(), 5);
    }

    #[test]
    fn policy_rejects_zero_settings() {
        assert_eq!(
            MfaPolicy::new(Duration::ZERO, 5).err(),
            Some(ConfigError::ZeroWindow)
        );
        assert_eq!(
            MfaPolicy::new(Duration::from_secs(900), 0).err(),
            Some(ConfigError::ZeroMfaThreshold)
        );
    }

    #[test]
    fn five_failures_lock_the_sixth_check() {
        let throttle = throttle();
        for _ in 0..4 {
            throttle.record_failure("alice", "203.0.113.4");
            assert!(throttle.check("alice").allowed);
        }
        throttle.record_failure("alice", "203.0.113.4");

        let decision = throttle.check("alice");
        assert!(!decision.allowed);
        assert!(decision.retry_after_ms.expect("retry hint") > unix_ms());
    }

    #[test]
    fn reset_restores_the_full_budget() {
        let throttle = throttle();
        for _ in 0..5 {
            throttle.record_failure("alice", "203.0.113.4");
        }
        assert!(!throttle.check("alice").allowed);

        throttle.reset("alice");
        assert!(throttle.check("alice").allowed);
        assert_eq!(throttle.failure_count("alice"), 0);
    }

    #[test]
    fn users_are_isolated() {
        let throttle = throttle();
        for _ in 0..5 {
            throttle.record_failure("alice", "203.0.113.4");
        }
        assert!(!throttle.check("alice").allowed);
        assert!(throttle.check("bob").allowed);
    }

    #[test]
    fn failures_age_out_of_the_trailing_window() {
        let throttle = throttle();
        let stale = unix_ms().saturating_sub(16 * 60 * 1000);
        for _ in 0..5 {
            throttle.record_failure_at("alice", "203.0.113.4", stale);
        }
        // All five are outside the trailing window: budget restored, but
        // only because those specific records aged out.
        assert!(throttle.check("alice").allowed);
        assert_eq!(throttle.failure_count("alice"), 0);

        for _ in 0..5 {
            throttle.record_failure("alice", "203.0.113.4");
        }
        assert!(!throttle.check("alice").allowed);
    }

    #[test]
    fn mixed_ages_count_only_recent_failures() {
        let throttle = throttle();
        let stale = unix_ms().saturating_sub(16 * 60 * 1000);
        for _ in 0..3 {
            throttle.record_failure_at("alice", "203.0.113.4", stale);
        }
        for _ in 0..3 {
            throttle.record_failure("alice", "198.51.100.7");
        }
        assert_eq!(throttle.failure_count("alice"), 3);
        assert!(throttle.check("alice").allowed);
    }

    #[test]
    fn failure_sources_are_recorded() {
        let throttle = throttle();
        throttle.record_failure("alice", "203.0.113.4");
        throttle.record_failure("alice", "198.51.100.7");
        assert_eq!(
            throttle.failure_sources("alice"),
            vec!["203.0.113.4".to_string(), "198.51.100.7".to_string()]
        );
    }
}
