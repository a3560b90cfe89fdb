use crate::cli::actions::Action;
use anyhow::Result;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        window_ms: matches
            .get_one::<u64>("window-ms")
            .copied()
            .unwrap_or(60_000),
        max_requests: matches
            .get_one::<u32>("max-requests")
            .copied()
            .unwrap_or(100),
        max_sessions: matches.get_one::<u32>("max-sessions").copied().unwrap_or(5),
        session_ttl_seconds: matches
            .get_one::<u64>("session-ttl-seconds")
            .copied()
            .unwrap_or(43_200),
        mfa_window_seconds: matches
            .get_one::<u64>("mfa-window-seconds")
            .copied()
            .unwrap_or(900),
        mfa_max_failures: matches
            .get_one::<u32>("mfa-max-failures")
            .copied()
            .unwrap_or(5),
        sweep_interval_seconds: matches
            .get_one::<u64>("sweep-interval-seconds")
            .copied()
            .unwrap_or(60),
    })
}
