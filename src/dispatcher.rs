// src/dispatcher.rs

use crate::{
    error::{default_upstream_error, AppError, Result},
    pool::KeyPool,
};
use axum::body::Bytes;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Minimum forwarding attempts per request, regardless of pool size. Gives a
/// small pool a few extra rotations before the request is abandoned.
pub const RETRY_LIMIT_FLOOR: usize = 13;

/// Marker substring in the upstream error payload that identifies a
/// quota/rate-limit failure (e.g. the `quotaExceeded` reason). Any other
/// error shape is surfaced to the client without a retry.
const QUOTA_MARKER: &str = "quota";

/// Retry budget for one inbound request: roughly two chances per key, with a
/// sane floor so tiny pools still tolerate transient double-failures.
pub fn retry_limit_for(pool_size: usize) -> usize {
    (pool_size * 2).max(RETRY_LIMIT_FLOOR)
}

/// Successful upstream payload, returned to the client verbatim.
#[derive(Debug)]
pub struct ForwardedResponse {
    pub body: Bytes,
    pub content_type: Option<String>,
}

/// Executes one logical client request against the upstream API, substituting
/// and rotating pool credentials until a non-quota response is obtained or
/// the retry budget is spent.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: Client,
    pool: Arc<KeyPool>,
    upstream_base_url: String,
    retry_limit: usize,
}

impl Dispatcher {
    pub fn new(
        client: Client,
        pool: Arc<KeyPool>,
        upstream_base_url: impl Into<String>,
        retry_limit: usize,
    ) -> Self {
        Self {
            client,
            pool,
            upstream_base_url: upstream_base_url.into(),
            retry_limit,
        }
    }

    pub fn retry_limit(&self) -> usize {
        self.retry_limit
    }

    /// Forwards `GET {upstream}/youtube/v3/{path}?{query}&key=<credential>`.
    ///
    /// `query` must already have the proxy's own access parameter stripped;
    /// the upstream credential is the only `key` parameter sent. The attempt
    /// counter lives on this call's stack, so nothing leaks across requests.
    #[instrument(level = "debug", skip(self, query), fields(path = %path))]
    pub async fn forward(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<ForwardedResponse> {
        let mut attempts = 0usize;

        loop {
            if self.pool.all_expired() {
                warn!(attempts, "No valid keys left in the pool");
                return Err(AppError::PoolExhausted);
            }
            if attempts >= self.retry_limit {
                warn!(
                    attempts,
                    retry_limit = self.retry_limit,
                    "Retry budget spent without a non-quota resolution"
                );
                return Err(AppError::RetryLimitExceeded);
            }
            attempts += 1;

            // all_expired() was false above, so a valid key exists; another
            // request failing it concurrently still leaves this a clean miss.
            let key = match self.pool.pick_random_valid() {
                Some(key) => key,
                None => return Err(AppError::PoolExhausted),
            };

            let url = format!(
                "{}/youtube/v3/{}",
                self.upstream_base_url.trim_end_matches('/'),
                path
            );
            debug!(key = %key.censored(), attempt = attempts, url = %url, "Forwarding request upstream");

            let response = match self
                .client
                .get(&url)
                .query(query)
                .query(&[("key", key.expose_credential())])
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    // Transport failures are not quota-shaped; retrying them
                    // with another key would only mask the real problem.
                    warn!(key = %key.censored(), error = %e, "Upstream request error");
                    return Err(AppError::Upstream {
                        code: 500,
                        error: default_upstream_error(),
                    });
                }
            };

            let status = response.status();
            if status.is_success() {
                let content_type = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                let body = response.bytes().await?;
                info!(key = %key.censored(), attempts, "Upstream call succeeded");
                return Ok(ForwardedResponse { body, content_type });
            }

            let error_object = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("error").cloned());

            if !is_quota_error(error_object.as_ref()) {
                info!(
                    key = %key.censored(),
                    status = status.as_u16(),
                    "Non-quota upstream error, surfacing to client"
                );
                return Err(upstream_error(status, error_object));
            }

            warn!(
                key = %key.censored(),
                attempt = attempts,
                "Quota exhausted on key, marking failed and rotating"
            );
            key.fail();
        }
    }
}

/// A quota failure is recognized by a marker substring anywhere in the
/// serialized upstream error object. Documented heuristic: the upstream
/// reason codes (`quotaExceeded`, `dailyLimitExceeded`, ...) are not an
/// exhaustive, stable enum.
fn is_quota_error(error_object: Option<&Value>) -> bool {
    error_object.is_some_and(|error| error.to_string().contains(QUOTA_MARKER))
}

fn upstream_error(status: StatusCode, error_object: Option<Value>) -> AppError {
    match error_object {
        Some(error) => {
            let code = error
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|code| u16::try_from(code).ok())
                .unwrap_or_else(|| status.as_u16());
            AppError::Upstream { code, error }
        }
        None => AppError::Upstream {
            code: 500,
            error: default_upstream_error(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_limit_scales_with_pool_but_keeps_a_floor() {
        assert_eq!(retry_limit_for(0), RETRY_LIMIT_FLOOR);
        assert_eq!(retry_limit_for(3), RETRY_LIMIT_FLOOR);
        assert_eq!(retry_limit_for(6), RETRY_LIMIT_FLOOR);
        assert_eq!(retry_limit_for(7), 14);
        assert_eq!(retry_limit_for(50), 100);
    }

    #[test]
    fn quota_reason_is_detected_anywhere_in_the_error() {
        let error = json!({
            "code": 403,
            "message": "The request cannot be completed because you have exceeded your quota.",
            "errors": [{ "reason": "quotaExceeded", "domain": "youtube.quota" }],
        });
        assert!(is_quota_error(Some(&error)));
    }

    #[test]
    fn non_quota_errors_are_not_retried() {
        let error = json!({
            "code": 400,
            "message": "Bad Request",
            "errors": [{ "reason": "invalidChannelId" }],
        });
        assert!(!is_quota_error(Some(&error)));
        assert!(!is_quota_error(None));
    }

    #[test]
    fn upstream_error_prefers_the_embedded_code() {
        let error = json!({ "code": 404, "message": "Not Found" });
        match upstream_error(StatusCode::BAD_GATEWAY, Some(error)) {
            AppError::Upstream { code, .. } => assert_eq!(code, 404),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_error_body_falls_back_to_generic_shape() {
        match upstream_error(StatusCode::NOT_FOUND, None) {
            AppError::Upstream { code, error } => {
                assert_eq!(code, 500);
                assert_eq!(error["message"], "Unknown error.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
