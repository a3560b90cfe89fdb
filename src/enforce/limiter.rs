//! Global rate limiter: fixed-window counting over a pluggable store.
//!
//! Flow Overview:
//! 1) Evaluate skip rules in order; the first match bypasses the check
//!    without consuming quota.
//! 2) Derive the key (client IP by default, per-user or composite via
//!    [`KeyStrategy`]).
//! 3) Atomically increment the key's windowed counter in the store.
//! 4) Over the limit: build a violation, notify the handler and audit sink,
//!    reject with a retry hint. Otherwise admit with the remaining budget.
//!
//! A store outage admits the request (fail open) so a storage incident never
//! turns into a full outage; the degradation is logged.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use super::audit::{AuditSink, SecurityEvent, Severity, TracingAuditSink, emit_guarded};
use super::request::{RequestMetadata, UNKNOWN_IP};
use super::store::RateLimitStore;
use super::{ConfigError, unix_ms};

/// How the rate limit key is derived from request metadata.
#[derive(Clone)]
pub enum KeyStrategy {
    /// `ip:{client ip}`, the default.
    ClientIp,
    /// `user:{id}` for authenticated requests, falling back to the client IP.
    PerUser,
    /// `ip:{client ip}:path:{path}` for per-endpoint budgets.
    IpAndPath,
    /// Caller-supplied derivation. A panicking generator is treated like
    /// missing metadata and yields the `"unknown"` key.
    Custom(Arc<dyn Fn(&RequestMetadata) -> String + Send + Sync>),
}

/// Predicate that exempts a request from rate limiting.
#[derive(Clone)]
pub enum SkipRule {
    PathPrefix(String),
    PathPattern(Regex),
    Method(String),
    Custom(Arc<dyn Fn(&RequestMetadata) -> bool + Send + Sync>),
}

impl SkipRule {
    fn matches(&self, metadata: &RequestMetadata) -> bool {
        match self {
            Self::PathPrefix(prefix) => metadata.path.starts_with(prefix.as_str()),
            Self::PathPattern(pattern) => pattern.is_match(&metadata.path),
            Self::Method(method) => metadata.method.eq_ignore_ascii_case(method),
            Self::Custom(predicate) => predicate(metadata),
        }
    }
}

type ViolationHandler = Arc<dyn Fn(&RateLimitViolation) + Send + Sync>;

/// Limiter configuration. Validated at construction; an unusable window
/// refuses to build rather than misbehave at request time.
#[derive(Clone)]
pub struct RateLimitPolicy {
    window: Duration,
    max_requests: u32,
    key_strategy: KeyStrategy,
    skip_rules: Vec<SkipRule>,
    violation_handler: Option<ViolationHandler>,
}

impl RateLimitPolicy {
    /// `max_requests = 0` is valid and means "always reject".
    pub fn new(window: Duration, max_requests: u32) -> Result<Self, ConfigError> {
        if window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(Self {
            window,
            max_requests,
            key_strategy: KeyStrategy::ClientIp,
            skip_rules: Vec::new(),
            violation_handler: None,
        })
    }

    #[must_use]
    pub fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    #[must_use]
    pub fn with_skip_rule(mut self, rule: SkipRule) -> Self {
        self.skip_rules.push(rule);
        self
    }

    #[must_use]
    pub fn with_violation_handler(
        mut self,
        handler: impl Fn(&RateLimitViolation) + Send + Sync + 'static,
    ) -> Self {
        self.violation_handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }
}

/// Request context attached to a violation for audit purposes.
#[derive(Clone, Debug, Serialize)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub user_agent: String,
}

/// Produced exactly once per request that exceeds the limit.
#[derive(Clone, Debug, Serialize)]
pub struct RateLimitViolation {
    pub key: String,
    pub count: u32,
    pub limit: u32,
    pub window_ms: u64,
    pub retry_after_ms: u64,
    pub timestamp_ms: u64,
    pub context: Option<RequestContext>,
}

/// Outcome of a single rate limit check.
#[derive(Clone, Debug)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub skipped: bool,
    pub count: u32,
    pub remaining: u32,
    pub limit: u32,
    pub reset_at_ms: u64,
    pub retry_after_ms: Option<u64>,
    pub violation: Option<RateLimitViolation>,
}

impl RateLimitDecision {
    fn skipped(limit: u32) -> Self {
        Self {
            allowed: true,
            skipped: true,
            count: 0,
            remaining: limit,
            limit,
            reset_at_ms: 0,
            retry_after_ms: None,
            violation: None,
        }
    }

    fn degraded(limit: u32) -> Self {
        Self {
            allowed: true,
            skipped: false,
            count: 0,
            remaining: limit,
            limit,
            reset_at_ms: 0,
            retry_after_ms: None,
            violation: None,
        }
    }
}

/// Windowed rate limiter over a pluggable [`RateLimitStore`].
pub struct RateLimiter<S> {
    policy: RateLimitPolicy,
    store: S,
    sink: Arc<dyn AuditSink>,
}

impl<S: RateLimitStore> RateLimiter<S> {
    pub fn new(policy: RateLimitPolicy, store: S) -> Self {
        Self {
            policy,
            store,
            sink: Arc::new(TracingAuditSink),
        }
    }

    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Derive the rate limit key for a request. Never fails.
    #[must_use]
    pub fn derive_key(&self, metadata: &RequestMetadata) -> String {
        match &self.policy.key_strategy {
            KeyStrategy::ClientIp => format!("ip:{}", metadata.ip_address),
            KeyStrategy::PerUser => metadata.user_id.as_ref().map_or_else(
                || format!("ip:{}", metadata.ip_address),
                |user_id| format!("user:{user_id}"),
            ),
            KeyStrategy::IpAndPath => {
                format!("ip:{}:path:{}", metadata.ip_address, metadata.path)
            }
            KeyStrategy::Custom(generator) => {
                match catch_unwind(AssertUnwindSafe(|| generator(metadata))) {
                    Ok(key) => key,
                    Err(_) => {
                        warn!("key generator panicked; falling back to the unknown key");
                        UNKNOWN_IP.to_string()
                    }
                }
            }
        }
    }

    /// Check a request against the configured window.
    pub async fn check(&self, metadata: &RequestMetadata) -> RateLimitDecision {
        let limit = self.policy.max_requests;

        for rule in &self.policy.skip_rules {
            if rule.matches(metadata) {
                return RateLimitDecision::skipped(limit);
            }
        }

        let key = self.derive_key(metadata);
        let entry = match self.store.incr(&key, self.policy.window).await {
            Ok(entry) => entry,
            Err(err) => {
                // A storage outage must not take the whole service down.
                warn!(error = %err, key = %key, "rate limit store unavailable; admitting request");
                return RateLimitDecision::degraded(limit);
            }
        };

        if entry.count > limit {
            let now = unix_ms();
            let retry_after_ms = entry.reset_at_ms.saturating_sub(now);
            let violation = self.build_violation(&key, entry.count, retry_after_ms, metadata);
            self.report(&violation, metadata);
            return RateLimitDecision {
                allowed: false,
                skipped: false,
                count: entry.count,
                remaining: 0,
                limit,
                reset_at_ms: entry.reset_at_ms,
                retry_after_ms: Some(retry_after_ms),
                violation: Some(violation),
            };
        }

        RateLimitDecision {
            allowed: true,
            skipped: false,
            count: entry.count,
            remaining: limit.saturating_sub(entry.count),
            limit,
            reset_at_ms: entry.reset_at_ms,
            retry_after_ms: None,
            violation: None,
        }
    }

    /// Remove a key's counter; the next check behaves like a first request.
    ///
    /// A store failure resolves to "absent" semantics either way.
    pub async fn clear_key(&self, key: &str) -> bool {
        match self.store.delete(key).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(error = %err, key = %key, "failed to clear rate limit key");
                false
            }
        }
    }

    fn build_violation(
        &self,
        key: &str,
        count: u32,
        retry_after_ms: u64,
        metadata: &RequestMetadata,
    ) -> RateLimitViolation {
        #[allow(clippy::cast_possible_truncation)]
        let window_ms = self.policy.window.as_millis() as u64;
        let context = if metadata.method.is_empty() && metadata.path.is_empty() {
            None
        } else {
            Some(RequestContext {
                method: metadata.method.clone(),
                path: metadata.path.clone(),
                user_agent: metadata.user_agent.clone(),
            })
        };
        RateLimitViolation {
            key: key.to_string(),
            count,
            limit: self.policy.max_requests,
            window_ms,
            retry_after_ms,
            timestamp_ms: unix_ms(),
            context,
        }
    }

    fn report(&self, violation: &RateLimitViolation, metadata: &RequestMetadata) {
        let mut event = SecurityEvent::new("rate_limit_violation", Severity::Warning)
            .with_ip_address(metadata.ip_address.clone())
            .with_details(serde_json::to_value(violation).unwrap_or(Value::Null));
        if let Some(user_id) = &metadata.user_id {
            event = event.with_user_id(user_id.clone());
        }
        emit_guarded(&self.sink, event);

        if let Some(handler) = &self.policy.violation_handler {
            // A misbehaving handler must not affect the decision.
            if catch_unwind(AssertUnwindSafe(|| handler(violation))).is_err() {
                error!(key = %violation.key, "violation handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforce::store::{MemoryRateLimitStore, RateLimitEntry, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingStore;

    impl RateLimitStore for FailingStore {
        async fn incr(&self, _key: &str, _window: Duration) -> Result<RateLimitEntry, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn get(&self, _key: &str) -> Result<Option<RateLimitEntry>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn set(
            &self,
            _key: &str,
            _entry: RateLimitEntry,
            _ttl: Duration,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn clear(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn metadata_for_ip(ip: &str) -> RequestMetadata {
        RequestMetadata {
            ip_address: ip.to_string(),
            method: "POST".to_string(),
            path: "/v1/login".to_string(),
            ..RequestMetadata::default()
        }
    }

    fn limiter(
        window: Duration,
        max_requests: u32,
    ) -> RateLimiter<std::sync::Arc<MemoryRateLimitStore>> {
        let policy = RateLimitPolicy::new(window, max_requests).expect("valid policy");
        RateLimiter::new(policy, std::sync::Arc::new(MemoryRateLimitStore::new()))
    }

    #[test]
    fn policy_rejects_zero_window() {
        assert_eq!(
            RateLimitPolicy::new(Duration::ZERO, 10).err(),
            Some(ConfigError::ZeroWindow)
        );
    }

    #[tokio::test]
    async fn admits_first_n_then_rejects() {
        let limiter = limiter(Duration::from_secs(60), 3);
        let metadata = metadata_for_ip("203.0.113.4");

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check(&metadata).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let rejected = limiter.check(&metadata).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.count, 4);
        assert!(rejected.retry_after_ms.expect("retry hint") > 0);
        let violation = rejected.violation.expect("violation");
        assert_eq!(violation.key, "ip:203.0.113.4");
        assert_eq!(violation.limit, 3);
        assert_eq!(violation.context.expect("context").path, "/v1/login");
    }

    #[tokio::test]
    async fn window_reset_restores_budget() {
        let limiter = limiter(Duration::from_millis(1000), 3);
        let metadata = metadata_for_ip("198.51.100.7");

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check(&metadata).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }
        assert!(!limiter.check(&metadata).await.allowed);

        tokio::time::sleep(Duration::from_millis(1050)).await;

        let fresh = limiter.check(&metadata).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.remaining, 2);
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let limiter = limiter(Duration::from_secs(60), 1);
        assert!(limiter.check(&metadata_for_ip("10.0.0.1")).await.allowed);
        assert!(!limiter.check(&metadata_for_ip("10.0.0.1")).await.allowed);
        assert!(limiter.check(&metadata_for_ip("10.0.0.2")).await.allowed);
    }

    #[tokio::test]
    async fn skip_rule_short_circuits_without_consuming_quota() {
        let store = std::sync::Arc::new(MemoryRateLimitStore::new());
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 3)
            .expect("valid policy")
            .with_skip_rule(SkipRule::PathPrefix("/health".to_string()));
        let limiter = RateLimiter::new(policy, store.clone());

        let mut metadata = metadata_for_ip("203.0.113.4");
        metadata.path = "/health".to_string();

        let decision = limiter.check(&metadata).await;
        assert!(decision.allowed);
        assert!(decision.skipped);
        assert!(store.get("ip:203.0.113.4").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn method_and_pattern_skip_rules_match() {
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 0)
            .expect("valid policy")
            .with_skip_rule(SkipRule::Method("OPTIONS".to_string()))
            .with_skip_rule(SkipRule::PathPattern(
                Regex::new(r"^/v1/docs(/|$)").expect("valid pattern"),
            ));
        let limiter = RateLimiter::new(policy, MemoryRateLimitStore::new());

        let mut preflight = metadata_for_ip("10.0.0.1");
        preflight.method = "options".to_string();
        assert!(limiter.check(&preflight).await.skipped);

        let mut docs = metadata_for_ip("10.0.0.1");
        docs.path = "/v1/docs/openapi.json".to_string();
        assert!(limiter.check(&docs).await.skipped);
    }

    #[tokio::test]
    async fn clear_behaves_like_first_request() {
        let limiter = limiter(Duration::from_secs(60), 2);
        let metadata = metadata_for_ip("203.0.113.9");

        limiter.check(&metadata).await;
        limiter.check(&metadata).await;
        assert!(!limiter.check(&metadata).await.allowed);

        assert!(limiter.clear_key(&limiter.derive_key(&metadata)).await);

        let fresh = limiter.check(&metadata).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.count, 1);
    }

    #[tokio::test]
    async fn zero_max_requests_always_rejects() {
        let limiter = limiter(Duration::from_secs(60), 0);
        let decision = limiter.check(&metadata_for_ip("203.0.113.4")).await;
        assert!(!decision.allowed);
        assert_eq!(decision.count, 1);
        assert!(decision.retry_after_ms.is_some());
    }

    #[tokio::test]
    async fn violation_handler_invoked_once_per_violation() {
        let calls = std::sync::Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 1)
            .expect("valid policy")
            .with_violation_handler(move |_violation| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        let limiter = RateLimiter::new(policy, MemoryRateLimitStore::new());
        let metadata = metadata_for_ip("203.0.113.4");

        limiter.check(&metadata).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        limiter.check(&metadata).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        limiter.check(&metadata).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_violation_handler_does_not_break_the_check() {
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 0)
            .expect("valid policy")
            .with_violation_handler(|_violation| panic!("handler exploded"));
        let limiter = RateLimiter::new(policy, MemoryRateLimitStore::new());

        let decision = limiter.check(&metadata_for_ip("203.0.113.4")).await;
        assert!(!decision.allowed);
        assert!(decision.violation.is_some());
    }

    #[tokio::test]
    async fn custom_key_generator_is_used() {
        let store = std::sync::Arc::new(MemoryRateLimitStore::new());
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 5)
            .expect("valid policy")
            .with_key_strategy(KeyStrategy::Custom(std::sync::Arc::new(|metadata| {
                format!("tenant:{}", metadata.ip_address)
            })));
        let limiter = RateLimiter::new(policy, store.clone());

        limiter.check(&metadata_for_ip("203.0.113.4")).await;
        assert!(
            store
                .get("tenant:203.0.113.4")
                .await
                .expect("get")
                .is_some()
        );
    }

    #[tokio::test]
    async fn panicking_key_generator_falls_back_to_unknown() {
        let store = std::sync::Arc::new(MemoryRateLimitStore::new());
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 5)
            .expect("valid policy")
            .with_key_strategy(KeyStrategy::Custom(std::sync::Arc::new(|_metadata| {
                panic!("generator exploded")
            })));
        let limiter = RateLimiter::new(policy, store.clone());

        let decision = limiter.check(&metadata_for_ip("203.0.113.4")).await;
        assert!(decision.allowed);
        assert!(store.get("unknown").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn per_user_strategy_prefers_principal() {
        let store = std::sync::Arc::new(MemoryRateLimitStore::new());
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 5)
            .expect("valid policy")
            .with_key_strategy(KeyStrategy::PerUser);
        let limiter = RateLimiter::new(policy, store.clone());

        let metadata = metadata_for_ip("203.0.113.4").with_user_id("42");
        limiter.check(&metadata).await;
        assert!(store.get("user:42").await.expect("get").is_some());

        let anonymous = metadata_for_ip("203.0.113.4");
        limiter.check(&anonymous).await;
        assert!(store.get("ip:203.0.113.4").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn store_outage_fails_open() {
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 3).expect("valid policy");
        let limiter = RateLimiter::new(policy, FailingStore);

        let decision = limiter.check(&metadata_for_ip("203.0.113.4")).await;
        assert!(decision.allowed);
        assert!(!decision.skipped);
        assert_eq!(decision.remaining, 3);
    }
}
