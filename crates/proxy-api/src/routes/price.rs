use crate::params::{complete_chain_single, complete_chains, flag_or};
use crate::response;
use crate::state::AppState;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use axum_extra::extract::Query;
use proxy_core::dates;
use proxy_core::types::PriceResult;
use serde::Deserialize;
use tracing::error;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleQuery {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub chain_id: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub symbol: String,
    pub is_cache: Option<String>,
    pub exclude_route: Option<String>,
    /// Historical only.
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleBody {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub chain_id: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub symbol: String,
    pub is_cache: Option<bool>,
    pub exclude_route: Option<bool>,
    pub date: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchQuery {
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub chain_ids: Vec<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub dates: Vec<String>,
    pub is_cache: Option<String>,
    pub exclude_route: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchBody {
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub chain_ids: Vec<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub dates: Vec<serde_json::Value>,
    pub is_cache: Option<bool>,
    pub exclude_route: Option<bool>,
}

fn parse_dates(raw: &[String]) -> Result<(Vec<i64>, Vec<String>), String> {
    let mut unix_dates = Vec::with_capacity(raw.len());
    for value in raw {
        match dates::parse_date_param(value) {
            Some(unix) => unix_dates.push(unix),
            None => return Err(format!("failed to parse date: {}", value)),
        }
    }
    Ok((unix_dates, raw.to_vec()))
}

fn parse_json_dates(raw: &[serde_json::Value]) -> Result<(Vec<i64>, Vec<String>), String> {
    let mut unix_dates = Vec::with_capacity(raw.len());
    let mut dates_str = Vec::with_capacity(raw.len());
    for value in raw {
        match value {
            serde_json::Value::String(s) => match dates::parse_date_param(s) {
                Some(unix) => {
                    unix_dates.push(unix);
                    dates_str.push(s.clone());
                }
                None => return Err(format!("failed to parse date: {}", s)),
            },
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(unix) => {
                    unix_dates.push(unix);
                    dates_str.push(unix.to_string());
                }
                None => return Err(format!("invalid date format: {}", n)),
            },
            other => return Err(format!("invalid date format: {}", other)),
        }
    }
    Ok((unix_dates, dates_str))
}

/// GET/POST /api/v1/price/current
pub async fn current_single_get(
    State(state): State<AppState>,
    Query(query): Query<SingleQuery>,
) -> Response {
    current_single(
        state,
        query.chain_id,
        query.network,
        query.address,
        query.symbol,
        flag_or(query.is_cache.as_deref(), true),
        flag_or(query.exclude_route.as_deref(), true),
    )
    .await
}

pub async fn current_single_post(
    State(state): State<AppState>,
    Json(body): Json<SingleBody>,
) -> Response {
    current_single(
        state,
        body.chain_id,
        body.network,
        body.address,
        body.symbol,
        body.is_cache.unwrap_or(true),
        body.exclude_route.unwrap_or(true),
    )
    .await
}

async fn current_single(
    state: AppState,
    chain_id: String,
    network: String,
    address: String,
    symbol: String,
    is_cache: bool,
    exclude_route: bool,
) -> Response {
    let (chain_id, network) = match complete_chain_single(&chain_id, &network) {
        Ok(resolved) => resolved,
        Err(message) => return response::app_error(500, message),
    };

    match state
        .price
        .get_price(&chain_id, &address, &symbol, &network, is_cache, exclude_route)
        .await
    {
        Ok(price) => {
            let timestamp = if price.is_some() {
                dates::now_unix().to_string()
            } else {
                "0".to_string()
            };
            response::ok(PriceResult {
                chain_id,
                address,
                price,
                symbol: Some(symbol).filter(|s| !s.is_empty()),
                network: Some(network).filter(|s| !s.is_empty()),
                timestamp,
                serial: 0,
                request_status: None,
            })
        }
        Err(e) => {
            error!(error = %e, "failed to retrieve price");
            response::app_error(500, e.to_string())
        }
    }
}

/// GET/POST /api/v1/price/current/batch
pub async fn current_batch_get(
    State(state): State<AppState>,
    Query(query): Query<BatchQuery>,
) -> Response {
    current_batch(
        state,
        query.addresses,
        query.chain_ids,
        query.networks,
        query.symbols,
        flag_or(query.is_cache.as_deref(), true),
        flag_or(query.exclude_route.as_deref(), true),
    )
    .await
}

pub async fn current_batch_post(
    State(state): State<AppState>,
    Json(body): Json<BatchBody>,
) -> Response {
    current_batch(
        state,
        body.addresses,
        body.chain_ids,
        body.networks,
        body.symbols,
        body.is_cache.unwrap_or(true),
        body.exclude_route.unwrap_or(true),
    )
    .await
}

async fn current_batch(
    state: AppState,
    addresses: Vec<String>,
    chain_ids: Vec<String>,
    networks: Vec<String>,
    symbols: Vec<String>,
    is_cache: bool,
    exclude_route: bool,
) -> Response {
    let (chain_ids, networks) = match complete_chains(addresses.len(), chain_ids, networks) {
        Ok(resolved) => resolved,
        Err(message) => return response::app_error(500, message),
    };

    match state
        .price
        .get_batch_price(&chain_ids, &addresses, &symbols, &networks, is_cache, exclude_route)
        .await
    {
        Ok(results) => response::ok(results),
        Err(e) => {
            error!(error = %e, "failed to retrieve batch prices");
            response::app_error(500, e.to_string())
        }
    }
}

/// GET/POST /api/v1/price/historical
pub async fn historical_single_get(
    State(state): State<AppState>,
    Query(query): Query<SingleQuery>,
) -> Response {
    let raw_date = query.date.clone().unwrap_or_default();
    historical_single(state, query.chain_id, query.network, query.address, query.symbol, raw_date)
        .await
}

pub async fn historical_single_post(
    State(state): State<AppState>,
    Json(body): Json<SingleBody>,
) -> Response {
    let raw_date = match &body.date {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    historical_single(state, body.chain_id, body.network, body.address, body.symbol, raw_date)
        .await
}

async fn historical_single(
    state: AppState,
    chain_id: String,
    network: String,
    address: String,
    symbol: String,
    raw_date: String,
) -> Response {
    let (chain_id, network) = match complete_chain_single(&chain_id, &network) {
        Ok(resolved) => resolved,
        Err(message) => return response::app_error(500, message),
    };
    let Some(unix_date) = dates::parse_date_param(&raw_date) else {
        return response::app_error(500, format!("failed to parse date: {}", raw_date));
    };

    match state
        .price
        .get_historical_price(&chain_id, &address, &symbol, &network, unix_date)
        .await
    {
        Ok(price) => response::ok(PriceResult {
            chain_id,
            address,
            price,
            symbol: Some(symbol).filter(|s| !s.is_empty()),
            network: Some(network).filter(|s| !s.is_empty()),
            timestamp: raw_date,
            serial: 0,
            request_status: None,
        }),
        Err(e) => {
            error!(error = %e, "failed to retrieve historical price");
            response::app_error(500, e.to_string())
        }
    }
}

/// GET/POST /api/v1/price/historical/batch
pub async fn historical_batch_get(
    State(state): State<AppState>,
    Query(query): Query<BatchQuery>,
) -> Response {
    let parsed = match parse_dates(&query.dates) {
        Ok(parsed) => parsed,
        Err(message) => return response::app_error(500, message),
    };
    historical_batch(
        state,
        query.addresses,
        query.chain_ids,
        query.networks,
        query.symbols,
        parsed,
    )
    .await
}

pub async fn historical_batch_post(
    State(state): State<AppState>,
    Json(body): Json<BatchBody>,
) -> Response {
    let parsed = match parse_json_dates(&body.dates) {
        Ok(parsed) => parsed,
        Err(message) => return response::app_error(500, message),
    };
    historical_batch(
        state,
        body.addresses,
        body.chain_ids,
        body.networks,
        body.symbols,
        parsed,
    )
    .await
}

async fn historical_batch(
    state: AppState,
    addresses: Vec<String>,
    chain_ids: Vec<String>,
    networks: Vec<String>,
    symbols: Vec<String>,
    (unix_dates, dates_str): (Vec<i64>, Vec<String>),
) -> Response {
    let (chain_ids, networks) = match complete_chains(addresses.len(), chain_ids, networks) {
        Ok(resolved) => resolved,
        Err(message) => return response::app_error(500, message),
    };
    if addresses.len() != unix_dates.len() {
        return response::app_error(
            500,
            "the lengths of the addresses and dates arrays must be the same",
        );
    }

    match state
        .price
        .get_batch_historical_price(&chain_ids, &addresses, &symbols, &networks, &unix_dates, &dates_str)
        .await
    {
        Ok(results) => response::ok(results),
        Err(e) => {
            error!(error = %e, "failed to retrieve batch historical prices");
            response::app_error(500, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dates_accepts_epoch_and_day() {
        let (unix, raw) = parse_dates(&["0".to_string(), "2024-07-15".to_string()]).unwrap();
        assert_eq!(unix, vec![0, 1_721_001_600]);
        assert_eq!(raw[1], "2024-07-15");
        assert!(parse_dates(&["not-a-date".to_string()]).is_err());
    }

    #[test]
    fn test_parse_json_dates_mixed() {
        let values = vec![
            serde_json::json!("2024-07-15"),
            serde_json::json!(1_721_001_600i64),
        ];
        let (unix, raw) = parse_json_dates(&values).unwrap();
        assert_eq!(unix, vec![1_721_001_600, 1_721_001_600]);
        assert_eq!(raw, vec!["2024-07-15", "1721001600"]);
        assert!(parse_json_dates(&[serde_json::json!({"bad": true})]).is_err());
    }
}
