pub mod server;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        window_ms: u64,
        max_requests: u32,
        max_sessions: u32,
        session_ttl_seconds: u64,
        mfa_window_seconds: u64,
        mfa_max_failures: u32,
        sweep_interval_seconds: u64,
    },
}
