use crate::api;
use crate::cli::actions::Action;
use crate::enforce::{MfaPolicy, RateLimitPolicy, SessionConfig};
use anyhow::{Context, Result, ensure};
use std::time::Duration;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            window_ms,
            max_requests,
            max_sessions,
            session_ttl_seconds,
            mfa_window_seconds,
            mfa_max_failures,
            sweep_interval_seconds,
        } => {
            // Unusable configuration refuses to start instead of limping along.
            let rate_policy = RateLimitPolicy::new(Duration::from_millis(window_ms), max_requests)
                .context("invalid rate limit configuration")?;
            let session_config = SessionConfig::new(
                max_sessions as usize,
                Duration::from_secs(session_ttl_seconds),
            )
            .context("invalid session configuration")?;
            let mfa_policy =
                MfaPolicy::new(Duration::from_secs(mfa_window_seconds), mfa_max_failures)
                    .context("invalid MFA throttle configuration")?;
            ensure!(
                sweep_interval_seconds > 0,
                "sweep interval must be greater than zero"
            );

            api::new(
                port,
                rate_policy,
                session_config,
                mfa_policy,
                Duration::from_secs(sweep_interval_seconds),
            )
            .await?;
        }
    }

    Ok(())
}
