// tests/common/mod.rs

use serde_json::{json, Value};
use std::sync::Arc;
use youtube_proxy::{
    config::{AppConfig, ServerConfig},
    pool::KeyPool,
    state::{build_http_client, AppState},
};

pub const CLIENT_SECRET: &str = "proxy-shared-secret";

/// A syntactically valid Google API key, unique per suffix character.
pub fn test_credential(suffix: char) -> String {
    format!("AIza{}{}", "0".repeat(34), suffix)
}

/// Upstream error body for an exhausted key, shaped like the real API.
pub fn quota_error_body() -> Value {
    json!({
        "error": {
            "code": 403,
            "message": "The request cannot be completed because you have exceeded your quota.",
            "errors": [{
                "reason": "quotaExceeded",
                "domain": "youtube.quota",
            }],
        }
    })
}

/// Upstream error body for a request problem unrelated to quota.
pub fn bad_request_error_body() -> Value {
    json!({
        "error": {
            "code": 400,
            "message": "The request specifies an invalid channel id.",
            "errors": [{
                "reason": "invalidChannelId",
                "domain": "youtube.search",
            }],
        }
    })
}

pub fn test_config(upstream_url: &str) -> AppConfig {
    AppConfig {
        server: ServerConfig::default(),
        proxy_api_key: CLIENT_SECRET.to_string(),
        upstream_url: upstream_url.trim_end_matches('/').to_string(),
        api_keys: Vec::new(),
    }
}

/// Builds shared state around an existing pool, pointed at a mock upstream.
pub fn test_state(upstream_url: &str, pool: KeyPool) -> Arc<AppState> {
    let client = build_http_client().expect("failed to build HTTP client");
    Arc::new(AppState::new(
        test_config(upstream_url),
        Arc::new(pool),
        client,
    ))
}
