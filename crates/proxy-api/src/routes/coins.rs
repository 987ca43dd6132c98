use crate::response;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use proxy_db::models::Coin;
use serde::Deserialize;
use tracing::error;

/// GET /price/coins: the full upstream coin list (cached).
pub async fn coin_list(State(state): State<AppState>) -> Response {
    match state.coingecko.coins_list(true).await {
        Ok(coins) => response::ok(coins),
        Err(e) => {
            error!(error = %e, "failed to retrieve token list");
            response::app_error(500, "failed to retrieve token list")
        }
    }
}

/// GET /price/sync: re-fetch the upstream list and upsert it.
pub async fn sync_coins(State(state): State<AppState>) -> Response {
    match state.coingecko.sync_coins().await {
        Ok(()) => response::ok(serde_json::Value::Null),
        Err(e) => {
            error!(error = %e, "failed to synchronize tokens");
            response::app_error(500, "failed to synchronize tokens")
        }
    }
}

/// POST /coins/add
pub async fn add_coin(State(state): State<AppState>, Json(coin): Json<Coin>) -> Response {
    match state.coin_repo.upsert_coins(&[coin]).await {
        Ok(()) => response::ok(serde_json::Value::Null),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

/// POST /coins/update/{id}
pub async fn update_coin(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut coin): Json<Coin>,
) -> Response {
    coin.id = id;
    match state.coin_repo.upsert_coins(&[coin]).await {
        Ok(()) => response::ok(serde_json::Value::Null),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

/// POST /coins/delete/{id}
pub async fn delete_coin(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.coin_repo.delete_coin(&id).await {
        Ok(()) => response::ok(serde_json::Value::Null),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

/// GET /coins/{id}
pub async fn get_coin(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.coin_repo.get_by_id(&id).await {
        Ok(Some(coin)) => response::ok(coin),
        Ok(None) => response::app_error(404, "coin not found"),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

/// GET /coins/refresh: rebuild the all-coins cache.
pub async fn refresh_all_coins(State(state): State<AppState>) -> Response {
    match state.coin_repo.refresh_all_coins_cache().await {
        Ok(()) => response::ok(serde_json::Value::Null),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshListBody {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// POST /coins/refreshList
pub async fn refresh_coin_list(
    State(state): State<AppState>,
    Json(body): Json<RefreshListBody>,
) -> Response {
    match state.coin_repo.refresh_coin_list_cache(&body.ids).await {
        Ok(()) => response::ok(serde_json::Value::Null),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

/// POST /redis/delete/{key}
pub async fn delete_redis_key(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.redis.delete(&key).await {
        Ok(()) => response::ok(serde_json::Value::Null),
        Err(e) => response::app_error(500, e.to_string()),
    }
}

/// POST /redis/deletePrefix/{prefix}
pub async fn delete_redis_prefix(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Response {
    match state.redis.delete_keys_by_prefix(&prefix).await {
        Ok(()) => response::ok(serde_json::Value::Null),
        Err(e) => response::app_error(500, e.to_string()),
    }
}
