use crate::response;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use proxy_db::models::AppToken;

/// GET /appToken
pub async fn list(State(state): State<AppState>) -> Response {
    match state.app_tokens.get_all().await {
        Ok(tokens) => response::ok(tokens),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

/// GET /appToken/{token}
pub async fn get(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    match state.app_tokens.get_by_token(&token).await {
        Ok(Some(app_token)) => response::ok(app_token),
        Ok(None) => response::app_error(404, "app token not found"),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

/// POST /appToken/add
pub async fn add(State(state): State<AppState>, Json(app_token): Json<AppToken>) -> Response {
    match state.app_tokens.add(&app_token).await {
        Ok(()) => response::ok(serde_json::Value::Null),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

/// POST /appToken/update/{token}
pub async fn update(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(mut app_token): Json<AppToken>,
) -> Response {
    app_token.token = token;
    match state.app_tokens.update(&app_token).await {
        Ok(()) => response::ok(serde_json::Value::Null),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

/// POST /appToken/delete/{token}
pub async fn delete(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    match state.app_tokens.delete(&token).await {
        Ok(()) => response::ok(serde_json::Value::Null),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

/// GET /k8s/healthz
pub async fn healthz(State(state): State<AppState>) -> Response {
    if state.redis.health_check().await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "redis unavailable").into_response();
    }
    if state.db.health_check().await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response();
    }
    (StatusCode::OK, "ok").into_response()
}
