// src/state.rs

use crate::{
    config::AppConfig,
    dispatcher::{retry_limit_for, Dispatcher},
    error::{AppError, Result},
    pool::KeyPool,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all axum handlers.
#[derive(Debug)]
pub struct AppState {
    pub config: AppConfig,
    pub pool: Arc<KeyPool>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Wires the pool and dispatcher together. The retry budget is fixed
    /// here, from the initial pool size, and never changes afterwards.
    pub fn new(config: AppConfig, pool: Arc<KeyPool>, client: Client) -> Self {
        let retry_limit = retry_limit_for(pool.len());
        info!(
            pool_size = pool.len(),
            retry_limit, "Application state initialized"
        );
        let dispatcher = Dispatcher::new(client, pool.clone(), config.upstream_url.clone(), retry_limit);
        Self {
            config,
            pool,
            dispatcher,
        }
    }
}

/// Builds the shared HTTP client used for probes and forwarding. Every
/// outbound call is bounded, so one hanging key cannot silently eat a whole
/// request's time budget.
pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))
}
