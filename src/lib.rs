// src/lib.rs

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod key;
pub mod pool;
pub mod state;

use axum::{
    body::Body,
    http::{HeaderValue, Request as AxumRequest},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use state::AppState;

/// Creates the main axum router for the application.
///
/// The health endpoints are open; everything else sits behind the client
/// authentication gate.
pub fn create_router(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route("/validKeysCount", get(handlers::valid_keys_count))
        .route("/invalidKeysCount", get(handlers::invalid_keys_count))
        .route("/youtube/v3/*path", get(handlers::forward))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            handlers::client_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/healthcheck", get(handlers::healthcheck))
        .merge(authenticated)
        .layer(axum::middleware::from_fn(trace_requests))
        .with_state(state)
}

/// Middleware attaching a request id and a latency log line to every request.
async fn trace_requests(
    mut req: AxumRequest<Body>,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let request_id = Uuid::new_v4();
    let start_time = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        http.method = %method,
        url.path = %path,
    );

    req.extensions_mut().insert(request_id);

    async move {
        let mut response = next.run(req).await;
        let elapsed = start_time.elapsed();

        if let Ok(header_value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("X-Request-Id", header_value);
        }

        info!(
            http.response.duration = ?elapsed,
            http.status_code = response.status().as_u16(),
            "Finished processing request"
        );

        response
    }
    .instrument(span)
    .await
}

/// Registers the configured credentials and refuses to boot on an empty
/// result. A pool that lost every candidate to validation can only ever
/// serve 403, so that misconfiguration fails fast at startup instead.
fn build_pool(credentials: &[String]) -> Result<pool::KeyPool> {
    let pool = pool::KeyPool::from_credentials(credentials);
    if pool.is_empty() {
        return Err(AppError::Config(
            "No usable upstream credentials: every configured key failed validation".to_string(),
        ));
    }
    Ok(pool)
}

/// Configures the application: loads config, registers and probes the key
/// pool, and builds the router.
///
/// The startup probe is awaited to completion here, before the caller binds
/// a listener, so the first forwarded requests already see an accurate key
/// validity snapshot.
pub async fn run() -> Result<(Router, AppConfig)> {
    info!("Starting YouTube API key rotation proxy...");

    let config = config::load_config()?;
    let pool = Arc::new(build_pool(&config.api_keys)?);

    let client = state::build_http_client()?;
    pool.probe_all(&client, &config.upstream_url).await;
    info!(
        valid = pool.valid_keys().len(),
        total = pool.len(),
        "Key pool ready"
    );

    let app_state = Arc::new(AppState::new(config.clone(), pool, client));
    Ok((create_router(app_state), config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_credential(suffix: char) -> String {
        format!("AIza{}{}", "0".repeat(34), suffix)
    }

    #[test]
    fn build_pool_rejects_an_all_malformed_credential_list() {
        let credentials = vec!["not-a-key".to_string(), "AIzaTooShort".to_string()];
        let result = build_pool(&credentials);
        assert!(matches!(result, Err(AppError::Config(_))), "got {result:?}");
    }

    #[test]
    fn build_pool_rejects_an_empty_credential_list() {
        assert!(matches!(build_pool(&[]), Err(AppError::Config(_))));
    }

    #[test]
    fn build_pool_keeps_the_usable_subset() {
        let credentials = vec!["garbage".to_string(), test_credential('a')];
        let pool = build_pool(&credentials).expect("one usable credential suffices");
        assert_eq!(pool.len(), 1);
    }
}
