//! Structured security events and the audit sink boundary.
//!
//! The core only produces events; storage and delivery belong to the
//! consumer. A sink that fails (or panics) must never change a rate-limit or
//! session decision, so every emission goes through [`emit_guarded`].

use serde::Serialize;
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::unix_ms;

/// Event severity, mirrored into the log level by [`TracingAuditSink`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A security decision worth recording: violation, eviction, invalidation.
#[derive(Clone, Debug, Serialize)]
pub struct SecurityEvent {
    /// Unique id so downstream consumers can deduplicate redeliveries.
    pub id: Uuid,
    pub kind: &'static str,
    pub severity: Severity,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp_ms: u64,
    pub details: Value,
}

impl SecurityEvent {
    #[must_use]
    pub fn new(kind: &'static str, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            user_id: None,
            ip_address: None,
            timestamp_ms: unix_ms(),
            details: Value::Null,
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Receiver for security events produced by the core.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: SecurityEvent);
}

/// Default sink: structured log records via `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: SecurityEvent) {
        let details = event.details.to_string();
        match event.severity {
            Severity::Info => info!(
                id = %event.id,
                kind = event.kind,
                user_id = event.user_id.as_deref(),
                ip_address = event.ip_address.as_deref(),
                timestamp_ms = event.timestamp_ms,
                details,
                "security event"
            ),
            Severity::Warning => warn!(
                id = %event.id,
                kind = event.kind,
                user_id = event.user_id.as_deref(),
                ip_address = event.ip_address.as_deref(),
                timestamp_ms = event.timestamp_ms,
                details,
                "security event"
            ),
            Severity::Critical => error!(
                id = %event.id,
                kind = event.kind,
                user_id = event.user_id.as_deref(),
                ip_address = event.ip_address.as_deref(),
                timestamp_ms = event.timestamp_ms,
                details,
                "security event"
            ),
        }
    }
}

/// Sink that drops everything. Useful in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: SecurityEvent) {}
}

/// Deliver an event, isolating a panicking sink from the caller.
pub(crate) fn emit_guarded(sink: &Arc<dyn AuditSink>, event: SecurityEvent) {
    let kind = event.kind;
    if catch_unwind(AssertUnwindSafe(|| sink.emit(event))).is_err() {
        error!(kind, "audit sink panicked; event dropped");
    }
}
