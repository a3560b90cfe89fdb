use crate::enforce::{
    MemoryRateLimitStore, MfaPolicy, MfaThrottle, RateLimitPolicy, RateLimiter, SessionConfig,
    SessionManager, Sweeper,
};
use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub(crate) mod handlers;
mod middleware;
mod openapi;

pub use handlers::EnforcerState;
pub use openapi::ApiDoc;

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    rate_policy: RateLimitPolicy,
    session_config: SessionConfig,
    mfa_policy: MfaPolicy,
    sweep_interval: Duration,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Ctrl-C flips the channel; in-flight requests drain before exit.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(());
        }
    });

    let store = Arc::new(MemoryRateLimitStore::new());
    let limiter = RateLimiter::new(rate_policy, store.clone());
    let state = Arc::new(EnforcerState::new(
        limiter,
        SessionManager::new(session_config),
        MfaThrottle::new(mfa_policy),
    ));

    // Advisory cleanup only; decisions rely on logical expiry in the store.
    let sweeper = Sweeper::spawn(store, sweep_interval);

    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            rx.recv().await;
            info!("Gracefully shutdown");
        })
        .await?;

    sweeper.stop().await;

    Ok(())
}

/// Build the router with every documented route registered and the rate
/// limit middleware applied to all of them.
#[must_use]
pub fn router(state: Arc<EnforcerState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/v1/sessions", post(handlers::sessions::create))
        .route("/v1/sessions/validate", post(handlers::sessions::validate))
        .route("/v1/sessions/logout", post(handlers::sessions::logout))
        .route(
            "/v1/sessions/invalidate",
            post(handlers::sessions::invalidate),
        )
        .route("/v1/mfa/check", post(handlers::mfa::check))
        .route("/v1/mfa/failures", post(handlers::mfa::record_failure))
        .route("/v1/mfa/reset", post(handlers::mfa::reset))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state))
                .layer(axum::middleware::from_fn(middleware::rate_limit)),
        )
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_user_agent_carries_name_and_version() {
        assert!(APP_USER_AGENT.starts_with("gardo/"));
    }

    #[test]
    fn router_builds_with_default_policies() {
        let policy =
            RateLimitPolicy::new(Duration::from_secs(60), 100).expect("valid rate policy");
        let limiter = RateLimiter::new(policy, Arc::new(MemoryRateLimitStore::new()));
        let state = Arc::new(EnforcerState::new(
            limiter,
            SessionManager::new(
                SessionConfig::new(5, Duration::from_secs(60)).expect("valid session config"),
            ),
            MfaThrottle::new(MfaPolicy::default()),
        ));
        let _router = router(state);
    }
}
