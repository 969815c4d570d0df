// src/config.rs

use crate::error::{AppError, Result};
use std::env;
use tracing::{info, warn};
use url::Url;

/// Environment variables holding upstream credentials share this prefix; the
/// variable name past the prefix is free-form (`YT_KEY_1`, `YT_ALICE`, ...).
pub const KEY_ENV_PREFIX: &str = "YT_";

const ENV_PROXY_API_KEY: &str = "EXT_API_KEY";
const ENV_HOST: &str = "HOST";
const ENV_PORT: &str = "PORT";
const ENV_UPSTREAM_URL: &str = "UPSTREAM_URL";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 1897;
const DEFAULT_UPSTREAM_URL: &str = "https://www.googleapis.com";

/// Configuration for the network address the proxy server listens on.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Root application configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Shared secret inbound clients must present as their `key` parameter.
    pub proxy_api_key: String,
    /// Base URL of the upstream API. Overridable so tests can point the
    /// dispatcher at a mock server.
    pub upstream_url: String,
    /// Candidate upstream credentials, validated again at pool registration.
    pub api_keys: Vec<String>,
}

/// Collects the values of all `YT_`-prefixed environment variables, sorted by
/// variable name for a deterministic registration order.
pub fn keys_from_env() -> Vec<String> {
    let mut entries: Vec<(String, String)> = env::vars()
        .filter(|(name, _)| name.starts_with(KEY_ENV_PREFIX))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.into_iter().map(|(_, value)| value).collect()
}

/// Loads and validates the application configuration from the environment.
///
/// The shared inbound secret is required. An empty credential list is an
/// error too: a proxy with nothing to rotate cannot serve any request.
pub fn load_config() -> Result<AppConfig> {
    let proxy_api_key = env::var(ENV_PROXY_API_KEY)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::Config(format!(
                "{ENV_PROXY_API_KEY} must be set to the shared client secret"
            ))
        })?;

    let port = match env::var(ENV_PORT) {
        Ok(value) => value.trim().parse::<u16>().map_err(|_| {
            AppError::Config(format!("{ENV_PORT} must be a valid port number, got '{value}'"))
        })?,
        Err(_) => DEFAULT_PORT,
    };

    let host = env::var(ENV_HOST).unwrap_or_else(|_| DEFAULT_HOST.to_string());

    let upstream_url = env::var(ENV_UPSTREAM_URL)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());
    Url::parse(&upstream_url)
        .map_err(|e| AppError::Config(format!("Invalid {ENV_UPSTREAM_URL} '{upstream_url}': {e}")))?;

    let api_keys = keys_from_env();
    if api_keys.is_empty() {
        return Err(AppError::Config(format!(
            "No upstream credentials found. Define at least one {KEY_ENV_PREFIX}* environment variable."
        )));
    }
    if upstream_url != DEFAULT_UPSTREAM_URL {
        warn!(upstream_url = %upstream_url, "Using non-default upstream base URL");
    }

    info!(
        host = %host,
        port,
        candidate_keys = api_keys.len(),
        "Configuration loaded from environment"
    );

    Ok(AppConfig {
        server: ServerConfig { host, port },
        proxy_api_key,
        upstream_url,
        api_keys,
    })
}
