// src/handlers.rs

use crate::{
    error::{AppError, Result},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Inbound query parameter carrying the client's proxy access key. Stripped
/// before forwarding so the shared secret never leaks upstream.
const CLIENT_KEY_PARAM: &str = "key";

pub async fn health() -> &'static str {
    "Server Online"
}

pub async fn healthcheck() -> &'static str {
    "OK"
}

pub async fn valid_keys_count(State(state): State<Arc<AppState>>) -> String {
    state.pool.valid_keys().len().to_string()
}

pub async fn invalid_keys_count(State(state): State<Arc<AppState>>) -> String {
    state.pool.invalid_keys().len().to_string()
}

/// Authentication gate for everything except the health endpoints.
///
/// Missing client key -> 400, mismatched -> 401, and a fully expired pool
/// short-circuits to 403 before the dispatcher is ever invoked.
pub async fn client_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let client_key = request.uri().query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == CLIENT_KEY_PARAM)
            .map(|(_, value)| value.into_owned())
    });

    match client_key {
        None => Err(AppError::MissingClientKey),
        Some(key) if key != state.config.proxy_api_key => Err(AppError::InvalidClientKey),
        Some(_) if state.pool.all_expired() => Err(AppError::PoolExhausted),
        Some(_) => Ok(next.run(request).await),
    }
}

/// Forwards `GET /youtube/v3/*path` through the dispatcher. The wildcard
/// segment and every query parameter except the proxy's own access key pass
/// through unchanged.
pub async fn forward(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response> {
    let query: Vec<(String, String)> = request
        .uri()
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .filter(|(name, _)| name != CLIENT_KEY_PARAM)
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect()
        })
        .unwrap_or_default();

    let forwarded = state.dispatcher.forward(&path, &query).await?;

    let mut response = Response::builder().status(StatusCode::OK);
    if let Some(content_type) = &forwarded.content_type {
        response = response.header(header::CONTENT_TYPE, content_type);
    }
    response
        .body(Body::from(forwarded.body))
        .map_err(|e| AppError::Internal(format!("Failed to build client response: {e}")))
        .map(IntoResponse::into_response)
}
