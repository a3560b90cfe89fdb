//! Device fingerprinting from low-entropy browser metadata.
//!
//! The fingerprint is a continuity heuristic for anomaly detection, not an
//! identity proof; it is trivially spoofable and must never gate access on
//! its own.

use sha2::{Digest, Sha256};

use super::request::RequestMetadata;

/// Length of the hex fingerprint.
const FINGERPRINT_LEN: usize = 16;

/// Derive a stable 16-hex-character fingerprint from connection metadata.
///
/// Pure function of user-agent, accept-language, and accept-encoding:
/// identical input always yields the identical fingerprint, across process
/// restarts.
#[must_use]
pub fn device_fingerprint(metadata: &RequestMetadata) -> String {
    let mut hasher = Sha256::new();
    hasher.update(metadata.user_agent.as_bytes());
    hasher.update(b"|");
    hasher.update(metadata.accept_language.as_bytes());
    hasher.update(b"|");
    hasher.update(metadata.accept_encoding.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}
