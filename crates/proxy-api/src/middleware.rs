use crate::response;
use crate::state::AppState;
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use proxy_db::models::RequestLog;
use proxy_redis::keys;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::error;

/// Request bodies larger than this are not logged in full.
const LOG_BODY_LIMIT: usize = 64 * 1024;

fn api_key_from(req: &Request) -> String {
    if let Some(value) = req.headers().get("X-API-KEY").and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return value.to_string();
        }
    }
    let query = req.uri().query().unwrap_or_default();
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("x_api_key=") {
            return value.to_string();
        }
    }
    String::new()
}

/// API-key rate limiter: per-token budget enforced through the shared-cache
/// Lua window. Unknown keys are rejected; anonymous callers get the default
/// budget when allowed at all.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let api_key = api_key_from(&req);

    if api_key.is_empty() && !state.config.allow_anonymous {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    let rate = if api_key.is_empty() {
        state.config.anonymous_rate
    } else {
        match state.app_tokens.get_by_token(&api_key).await {
            Ok(Some(token)) => token.rate as f64,
            Ok(None) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, "Api key invalid").into_response();
            }
            Err(e) => {
                error!(error = %e, "Failed to check rate limiter");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Api key invalid").into_response();
            }
        }
    };

    let allowed = state
        .redis
        .rate_limit_allow(&keys::rate_limit_key(&api_key), rate, 1)
        .await;
    match allowed {
        Ok(true) => next.run(req).await,
        Ok(false) => (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response(),
        Err(e) => {
            error!(error = %e, "Rate limiter evaluation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Api key invalid").into_response()
        }
    }
}

/// Capture (ip, endpoint, params, response, execution ms) into the
/// fire-and-forget log queue.
pub async fn request_log(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let endpoint = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or_default().to_string();
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_default();

    // Buffer the request body so it can be logged and replayed.
    let (parts, body) = req.into_parts();
    let request_bytes = match to_bytes(body, LOG_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => Default::default(),
    };
    let req = Request::from_parts(parts, Body::from(request_bytes.clone()));

    let response = next.run(req).await;

    // Buffer the response body for the log record.
    let (parts, body) = response.into_parts();
    let response_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => Default::default(),
    };
    let response = Response::from_parts(parts, Body::from(response_bytes.clone()));

    let request_params = if request_bytes.is_empty() {
        query
    } else {
        String::from_utf8_lossy(&request_bytes).to_string()
    };

    state.request_logs.insert_log(RequestLog {
        ip_address: ip,
        endpoint,
        request_params,
        response: String::from_utf8_lossy(&response_bytes).to_string(),
        execution_time: started.elapsed().as_millis() as i64,
    });

    response
}

/// Hard per-request deadline; in-flight upstream calls keep their own
/// timeouts.
pub async fn deadline(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let limit = Duration::from_secs(state.config.request_timeout_secs);
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => response::timeout(),
    }
}
