//! Session lifecycle, device continuity, and security-trigger handling.
//!
//! Flow Overview:
//! 1) The authentication layer creates a session after a successful login;
//!    the raw token is returned once and only its hash is kept in the table.
//! 2) Validation checks presence, active state, and expiry; IP or device
//!    fingerprint changes are surfaced as risk signals, never enforced here
//!    (travelling users legitimately change IPs).
//! 3) High-severity security triggers invalidate every session for a user.
//!    This is the only path that flips more than one session.
//!
//! A session that goes inactive stays inactive; records are never physically
//! deleted by this module (archival is the owner's concern).

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;
use utoipa::ToSchema;

use super::audit::{AuditSink, SecurityEvent, Severity, TracingAuditSink, emit_guarded};
use super::fingerprint::device_fingerprint;
use super::request::RequestMetadata;
use super::{ConfigError, unix_ms};

/// Session manager configuration, validated at construction.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    max_concurrent_sessions: usize,
    session_ttl: Duration,
}

impl SessionConfig {
    pub fn new(max_concurrent_sessions: usize, session_ttl: Duration) -> Result<Self, ConfigError> {
        if max_concurrent_sessions == 0 {
            return Err(ConfigError::ZeroMaxSessions);
        }
        if session_ttl.is_zero() {
            return Err(ConfigError::ZeroSessionTtl);
        }
        Ok(Self {
            max_concurrent_sessions,
            session_ttl,
        })
    }

    #[must_use]
    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_concurrent_sessions
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }
}

/// A live session as handed back to the authentication layer.
///
/// `session_id` is the raw token; it appears here once and is stored only as
/// a hash.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub device_fingerprint: String,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    pub is_active: bool,
}

/// High-severity events that force logout of every session for a user.
///
/// Parsing is exact-match; callers normalize names before calling. Unknown
/// strings never coerce into a trigger.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityTrigger {
    PasswordChanged,
    AccountLocked,
    SuspiciousActivity,
    MfaDisabled,
    RoleChanged,
    AccountCompromised,
}

impl SecurityTrigger {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PasswordChanged => "PASSWORD_CHANGED",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            Self::MfaDisabled => "MFA_DISABLED",
            Self::RoleChanged => "ROLE_CHANGED",
            Self::AccountCompromised => "ACCOUNT_COMPROMISED",
        }
    }

    /// Parse an external trigger name. `None` means unrecognized, and an
    /// unrecognized trigger never invalidates anything.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PASSWORD_CHANGED" => Some(Self::PasswordChanged),
            "ACCOUNT_LOCKED" => Some(Self::AccountLocked),
            "SUSPICIOUS_ACTIVITY" => Some(Self::SuspiciousActivity),
            "MFA_DISABLED" => Some(Self::MfaDisabled),
            "ROLE_CHANGED" => Some(Self::RoleChanged),
            "ACCOUNT_COMPROMISED" => Some(Self::AccountCompromised),
            _ => None,
        }
    }
}

/// Continuity anomaly observed during validation. A signal for the caller's
/// step-up policy, not a rejection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskSignal {
    IpChanged,
    DeviceChanged,
}

/// Validation outcome. Invalid sessions carry no reason: expiry, logout, and
/// bulk invalidation are indistinguishable to the caller by design.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionValidation {
    pub valid: bool,
    pub user_id: Option<String>,
    pub risk: Vec<RiskSignal>,
}

impl SessionValidation {
    fn invalid() -> Self {
        Self {
            valid: false,
            user_id: None,
            risk: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
struct SessionRecord {
    user_id: String,
    ip_address: String,
    user_agent: String,
    device_fingerprint: String,
    created_at_ms: u64,
    expires_at_ms: u64,
    is_active: bool,
}

/// In-process session table keyed by token hash.
pub struct SessionManager {
    config: SessionConfig,
    table: RwLock<HashMap<Vec<u8>, SessionRecord>>,
    sink: Arc<dyn AuditSink>,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            table: RwLock::new(HashMap::new()),
            sink: Arc::new(TracingAuditSink),
        }
    }

    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read-only metadata extraction shared by creation and validation.
    /// Never fails; missing headers resolve to defaults.
    #[must_use]
    pub fn extract_session_metadata(metadata: &RequestMetadata) -> (String, String, String) {
        (
            metadata.ip_address.clone(),
            metadata.user_agent.clone(),
            device_fingerprint(metadata),
        )
    }

    /// Create a session for `user_id`, evicting the oldest active session
    /// first when the user is at the concurrency ceiling. The ceiling is
    /// never silently exceeded.
    pub fn create_session(&self, user_id: &str, metadata: &RequestMetadata) -> Result<Session> {
        let (ip_address, user_agent, fingerprint) = Self::extract_session_metadata(metadata);
        let now = unix_ms();
        #[allow(clippy::cast_possible_truncation)]
        let ttl_ms = self.config.session_ttl.as_millis() as u64;

        let mut evicted: Vec<(String, u64)> = Vec::new();
        let session = {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);

            loop {
                let active = table
                    .values()
                    .filter(|record| {
                        record.user_id == user_id && record.is_active && now < record.expires_at_ms
                    })
                    .count();
                if active < self.config.max_concurrent_sessions {
                    break;
                }
                let oldest = table
                    .values_mut()
                    .filter(|record| {
                        record.user_id == user_id && record.is_active && now < record.expires_at_ms
                    })
                    .min_by_key(|record| record.created_at_ms)
                    .ok_or_else(|| anyhow!("no evictable session despite full ceiling"))?;
                oldest.is_active = false;
                evicted.push((oldest.ip_address.clone(), oldest.created_at_ms));
            }

            let mut inserted = None;
            // Collisions on 32 random bytes are not expected; the retry loop
            // keeps the invariant explicit.
            for _ in 0..3 {
                let token = generate_session_token()?;
                let token_hash = hash_session_token(&token);
                if table.contains_key(&token_hash) {
                    continue;
                }
                let record = SessionRecord {
                    user_id: user_id.to_string(),
                    ip_address: ip_address.clone(),
                    user_agent: user_agent.clone(),
                    device_fingerprint: fingerprint.clone(),
                    created_at_ms: now,
                    expires_at_ms: now + ttl_ms,
                    is_active: true,
                };
                table.insert(token_hash, record);
                inserted = Some(Session {
                    session_id: token,
                    user_id: user_id.to_string(),
                    ip_address: ip_address.clone(),
                    user_agent: user_agent.clone(),
                    device_fingerprint: fingerprint.clone(),
                    created_at_ms: now,
                    expires_at_ms: now + ttl_ms,
                    is_active: true,
                });
                break;
            }
            inserted.context("failed to generate unique session token")?
        };

        for (evicted_ip, created_at_ms) in evicted {
            emit_guarded(
                &self.sink,
                SecurityEvent::new("session_evicted", Severity::Info)
                    .with_user_id(user_id)
                    .with_ip_address(evicted_ip)
                    .with_details(serde_json::json!({
                        "reason": "concurrent_session_limit",
                        "created_at_ms": created_at_ms,
                    })),
            );
        }

        Ok(session)
    }

    /// Validate a session token against the table.
    ///
    /// Rejects absent, inactive, and expired sessions; flags (but does not
    /// reject) IP or device fingerprint changes.
    pub fn validate_session(
        &self,
        session_id: &str,
        metadata: &RequestMetadata,
    ) -> SessionValidation {
        let token_hash = hash_session_token(session_id);
        let now = unix_ms();
        let (validation, risk_event) = {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            let Some(record) = table.get_mut(&token_hash) else {
                debug!("session validation failed: unknown token");
                return SessionValidation::invalid();
            };
            if !record.is_active {
                debug!("session validation failed: inactive session");
                return SessionValidation::invalid();
            }
            if now >= record.expires_at_ms {
                // Expiry is terminal; the record never reactivates.
                record.is_active = false;
                debug!("session validation failed: expired session");
                return SessionValidation::invalid();
            }

            let mut risk = Vec::new();
            if record.ip_address != metadata.ip_address {
                risk.push(RiskSignal::IpChanged);
            }
            if record.device_fingerprint != device_fingerprint(metadata) {
                risk.push(RiskSignal::DeviceChanged);
            }

            let risk_event = if risk.is_empty() {
                None
            } else {
                Some(
                    SecurityEvent::new("session_risk_flagged", Severity::Warning)
                        .with_user_id(record.user_id.clone())
                        .with_ip_address(metadata.ip_address.clone())
                        .with_details(serde_json::json!({
                            "signals": risk,
                            "recorded_ip": record.ip_address,
                        })),
                )
            };

            (
                SessionValidation {
                    valid: true,
                    user_id: Some(record.user_id.clone()),
                    risk,
                },
                risk_event,
            )
        };

        if let Some(event) = risk_event {
            emit_guarded(&self.sink, event);
        }
        validation
    }

    /// Deactivate a single session. Idempotent; returns whether the session
    /// was active.
    pub fn logout(&self, session_id: &str) -> bool {
        let token_hash = hash_session_token(session_id);
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        match table.get_mut(&token_hash) {
            Some(record) if record.is_active => {
                record.is_active = false;
                true
            }
            _ => false,
        }
    }

    /// Whether an external trigger name forces bulk invalidation.
    ///
    /// Exact matches against the recognized trigger set only; case variants
    /// and unknown strings return `false`.
    #[must_use]
    pub fn should_invalidate_sessions(trigger: &str) -> bool {
        SecurityTrigger::parse(trigger).is_some()
    }

    /// Deactivate every session for `user_id`. The sole multi-session
    /// mutation path. Returns how many sessions were flipped.
    pub fn invalidate_all_sessions(&self, user_id: &str, trigger: SecurityTrigger) -> usize {
        let invalidated = {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            let mut flipped = 0;
            for record in table.values_mut() {
                if record.user_id == user_id && record.is_active {
                    record.is_active = false;
                    flipped += 1;
                }
            }
            flipped
        };

        if invalidated > 0 {
            emit_guarded(
                &self.sink,
                SecurityEvent::new("sessions_invalidated", Severity::Warning)
                    .with_user_id(user_id)
                    .with_details(serde_json::json!({
                        "trigger": trigger.as_str(),
                        "count": invalidated,
                    })),
            );
        }
        invalidated
    }

    /// Count of live sessions for a user.
    #[must_use]
    pub fn active_session_count(&self, user_id: &str) -> usize {
        let now = unix_ms();
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table
            .values()
            .filter(|record| {
                record.user_id == user_id && record.is_active && now < record.expires_at_ms
            })
            .count()
    }
}

/// Create a new session token.
/// The raw value is only returned to the caller; the table stores a hash.
fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session token so raw values never touch the table.
fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
