use crate::config::SourcesConfig;
use crate::http::{format_price, get_raw, parse_json, status_error};
use crate::{Result, SourceError};
use futures::future::join_all;
use proxy_core::dates;
use proxy_core::types::{coin_id, get_or_none, PriceResult};
use proxy_db::models::{Coin, HistoricalPrice};
use proxy_db::repositories::{CoinRepository, HistoricalPriceRepository};
use proxy_redis::{keys, RedisConnection};
use proxy_throttle::AlertNotifier;
use redis::AsyncCommands;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::error;

const BASE_URL: &str = "https://api.geckoterminal.com/api/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Per-network request budget: at most 30 upstream calls per 60-s window.
const NETWORK_BUDGET: i64 = 30;
const NETWORK_BUDGET_WINDOW: Duration = Duration::from_secs(60);

const TOKEN_INFO_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const POOL_INFO_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Static chain-id to network-slug map.
fn network_for_chain(chain_id: &str) -> Option<&'static str> {
    let network = match chain_id {
        "1" => "eth",
        "56" => "bsc",
        "128" => "heco",
        "137" => "polygon_pos",
        "66" => "okexchain",
        "42161" => "arbitrum",
        "1285" => "movr",
        "1313161554" => "aurora",
        "288" => "boba",
        "43114" => "avax",
        "10" => "optimism",
        "25" => "cro",
        "321" => "kcc",
        "100" => "xdai",
        "1030" => "cfx",
        "1088" => "metis",
        "4444" => "qkc",
        "30" => "rsk",
        "60" => "gochain",
        "122" => "fuse",
        "11297108109" => "iotex",
        "42220" => "celo",
        "4689" => "iotex",
        "1666600000" => "harmony",
        "10000" => "smartbch",
        "181" => "meter",
        "57" => "sys",
        "1229" => "polis",
        "534352" => "scroll",
        "250" => "ftm",
        "59144" => "linea",
        "8453" => "base",
        "5000" => "mantle",
        "169" => "manta-pacific",
        _ => return None,
    };
    Some(network)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    data: Option<TokenData>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    attributes: TokenAttributes,
    #[serde(default)]
    relationships: Option<TokenRelationships>,
}

#[derive(Debug, Deserialize)]
struct TokenAttributes {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    decimals: Option<i32>,
    #[serde(default)]
    total_supply: Option<String>,
    #[serde(default)]
    price_usd: Option<String>,
    #[serde(default)]
    total_reserve_in_usd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenRelationships {
    #[serde(default)]
    top_pools: Option<RelationshipList>,
}

#[derive(Debug, Deserialize)]
struct RelationshipList {
    #[serde(default)]
    data: Vec<RelationshipRef>,
}

#[derive(Debug, Deserialize)]
struct RelationshipRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PoolResponse {
    data: Option<PoolData>,
}

#[derive(Debug, Deserialize)]
struct PoolData {
    relationships: PoolRelationships,
}

#[derive(Debug, Deserialize)]
struct PoolRelationships {
    base_token: RelationshipItem,
}

#[derive(Debug, Deserialize)]
struct RelationshipItem {
    data: RelationshipRef,
}

#[derive(Debug, Deserialize)]
struct OhlcvResponse {
    data: Option<OhlcvData>,
}

#[derive(Debug, Deserialize)]
struct OhlcvData {
    attributes: OhlcvAttributes,
}

#[derive(Debug, Deserialize)]
struct OhlcvAttributes {
    #[serde(default)]
    ohlcv_list: Vec<Vec<f64>>,
}

/// Pool/token ids come back as `{network}_{address}`.
fn extract_address(id: &str) -> &str {
    id.rsplit('_').next().unwrap_or(id)
}

/// Geckoterminal adapter: per-token lookups with a per-network request
/// budget and OHLCV-based historical backfill.
#[derive(Clone)]
pub struct GeckoterminalSource {
    client: Client,
    api_key: String,
    redis: RedisConnection,
    coin_repo: CoinRepository,
    historical_repo: HistoricalPriceRepository,
    notifier: AlertNotifier,
    total_reserve_threshold: f64,
    price_usd_threshold: f64,
}

impl GeckoterminalSource {
    pub fn new(
        config: &SourcesConfig,
        redis: RedisConnection,
        coin_repo: CoinRepository,
        historical_repo: HistoricalPriceRepository,
        notifier: AlertNotifier,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: config.geckoterminal_api_key.clone(),
            redis,
            coin_repo,
            historical_repo,
            notifier,
            total_reserve_threshold: config.total_reserve_threshold,
            price_usd_threshold: config.price_usd_threshold,
        }
    }

    /// A tiny reserve backing an enormous quote is treated as a bad listing.
    fn is_suspicious(&self, attributes: &TokenAttributes) -> bool {
        let (Some(price), Some(reserve)) = (
            attributes.price_usd.as_deref().and_then(|p| p.parse::<f64>().ok()),
            attributes
                .total_reserve_in_usd
                .as_deref()
                .and_then(|r| r.parse::<f64>().ok()),
        ) else {
            return false;
        };
        reserve < self.total_reserve_threshold && price > self.price_usd_threshold
    }

    /// Spend one unit of the per-network budget. Returns `false` when the
    /// window is exhausted and the call should be skipped.
    async fn spend_network_budget(&self, network: &str) -> bool {
        let limit_key = keys::geckoterminal_limit_key(network);
        let mut conn = self.redis.get_connection();
        if let Ok(Some(raw)) = self.redis.get_string(&limit_key).await {
            if raw.parse::<i64>().map(|used| used > NETWORK_BUDGET).unwrap_or(false) {
                return false;
            }
        }
        let _: std::result::Result<i64, redis::RedisError> = conn.incr(&limit_key, 1).await;
        let _: std::result::Result<(), redis::RedisError> = conn
            .expire(&limit_key, NETWORK_BUDGET_WINDOW.as_secs() as i64)
            .await;
        true
    }

    async fn fetch_token(&self, network: &str, address: &str, context: &str) -> Result<TokenResponse> {
        let url = format!(
            "{}/networks/{}/tokens/{}?partner_api_key={}",
            BASE_URL, network, address, self.api_key
        );
        let (status, body) = get_raw(&self.client, &url, &[("accept", "application/json")], REQUEST_TIMEOUT).await?;
        if status != StatusCode::OK && status != StatusCode::NOT_FOUND {
            let err = status_error(status, &body);
            if !matches!(err, SourceError::RateLimited) {
                self.notifier
                    .report_upstream_error(context, &format!("url: {}, status: {}", url, status))
                    .await;
            }
            return Err(err);
        }
        parse_json(&body)
    }

    /// Insert a minimal coin record when the store has never seen this coin.
    async fn ensure_coin_exists(
        &self,
        chain_id: &str,
        address: &str,
        network: &str,
        attributes: &TokenAttributes,
    ) -> Result<()> {
        let id = coin_id(chain_id, address);
        if self.coin_repo.check_coin_exists(&id).await? {
            return Ok(());
        }
        let mut coin = Coin::minimal(
            chain_id,
            address,
            attributes.symbol.clone(),
            attributes.name.clone(),
            attributes.decimals,
            attributes.total_supply.clone(),
            "geckoterminal",
        );
        coin.geckoterminal_network = Some(network.to_string());
        self.coin_repo.upsert_coins(&[coin]).await?;
        Ok(())
    }

    /// Current price for one token.
    pub async fn current_single(
        &self,
        chain_id: &str,
        address: &str,
        is_cache: bool,
    ) -> Result<Option<String>> {
        let Some(network) = network_for_chain(chain_id) else {
            return Ok(None);
        };
        let id = coin_id(chain_id, address);

        if is_cache {
            if let Some(price) = self.redis.get_current_price(&id).await? {
                if !price.is_empty() {
                    return Ok(Some(price));
                }
            }
        }

        if !self.spend_network_budget(network).await {
            return Ok(None);
        }

        let token = self
            .fetch_token(network, address, "GeckoterminalSource-current_single")
            .await?;
        let Some(data) = token.data else {
            return Ok(None);
        };
        let attributes = data.attributes;
        let Some(price) = attributes.price_usd.clone() else {
            return Ok(None);
        };
        if self.is_suspicious(&attributes) {
            return Ok(None);
        }

        self.redis.set_current_price(&id, &price).await.ok();
        if let Err(e) = self.ensure_coin_exists(chain_id, address, network, &attributes).await {
            error!(error = %e, coin_id = %id, "Failed to insert minimal coin record");
        }
        let record = HistoricalPrice::new(id, dates::now_unix(), price.clone(), "geckoterminal");
        if let Err(e) = self.historical_repo.save_prices(vec![record]).await {
            error!(error = %e, "Failed to save historical price");
        }
        Ok(Some(price))
    }

    /// Historical price via the token's top pool: up to 1000 daily OHLCV
    /// bars are written back, the target day's close is returned.
    pub async fn historical_single(
        &self,
        chain_id: &str,
        address: &str,
        unix_date: i64,
    ) -> Result<Option<String>> {
        let Some(network) = network_for_chain(chain_id) else {
            return Ok(None);
        };
        let id = coin_id(chain_id, address);
        let day = dates::day_date(unix_date);

        let existing = self
            .historical_repo
            .get_prices(&[id.clone()], &[unix_date])
            .await?;
        if let Some(price) = existing.get(&format!("{}_{}", id, day)) {
            return Ok(Some(price.clone()));
        }

        if day == dates::today_day_date() {
            let price = self.current_single(chain_id, address, true).await?;
            if let Some(price) = &price {
                if !price.is_empty() {
                    self.redis.set_historical_price(&id, &day, price).await.ok();
                }
            }
            return Ok(price);
        }

        // Token info is cached: the pool walk happens at most once a day.
        let token_cache_key = format!("geckoterminal:token:tokenInfo:{}:{}", network, address);
        let token: TokenResponse = match self.redis.get_string(&token_cache_key).await? {
            Some(raw) => parse_json(&raw)?,
            None => {
                let url = format!(
                    "{}/networks/{}/tokens/{}?partner_api_key={}",
                    BASE_URL, network, address, self.api_key
                );
                let (status, body) =
                    get_raw(&self.client, &url, &[("accept", "application/json")], REQUEST_TIMEOUT)
                        .await?;
                if status != StatusCode::OK && status != StatusCode::NOT_FOUND {
                    let err = status_error(status, &body);
                    if !matches!(err, SourceError::RateLimited) {
                        self.notifier
                            .report_upstream_error(
                                "GeckoterminalSource-historical_single",
                                &format!("url: {}, status: {}", url, status),
                            )
                            .await;
                    }
                    return Err(err);
                }
                self.redis
                    .set_string(&token_cache_key, &body, TOKEN_INFO_TTL)
                    .await
                    .ok();
                parse_json(&body)?
            }
        };

        let Some(data) = token.data else {
            return Ok(None);
        };
        if self.is_suspicious(&data.attributes) {
            return Ok(None);
        }
        if let Err(e) = self
            .ensure_coin_exists(chain_id, address, network, &data.attributes)
            .await
        {
            error!(error = %e, coin_id = %id, "Failed to insert minimal coin record");
        }

        let Some(pool_ref) = data
            .relationships
            .as_ref()
            .and_then(|r| r.top_pools.as_ref())
            .and_then(|p| p.data.first())
        else {
            return Ok(None);
        };
        let pool_address = extract_address(&pool_ref.id).to_string();

        let pool_cache_key = format!("geckoterminal:tokenPools:poolInfo:{}", pool_address);
        let pool: PoolResponse = match self.redis.get_string(&pool_cache_key).await? {
            Some(raw) => parse_json(&raw)?,
            None => {
                let url = format!(
                    "{}/networks/{}/pools/{}?partner_api_key={}",
                    BASE_URL, network, pool_address, self.api_key
                );
                let (status, body) =
                    get_raw(&self.client, &url, &[("accept", "application/json")], REQUEST_TIMEOUT)
                        .await?;
                if status != StatusCode::OK && status != StatusCode::NOT_FOUND {
                    let err = status_error(status, &body);
                    if !matches!(err, SourceError::RateLimited) {
                        self.notifier
                            .report_upstream_error(
                                "GeckoterminalSource-historical_single-pool",
                                &format!("url: {}, status: {}", url, status),
                            )
                            .await;
                    }
                    return Err(err);
                }
                self.redis
                    .set_string(&pool_cache_key, &body, POOL_INFO_TTL)
                    .await
                    .ok();
                parse_json(&body)?
            }
        };

        let Some(pool_data) = pool.data else {
            return Ok(None);
        };
        let base_token_address = extract_address(&pool_data.relationships.base_token.data.id);
        let side = if address.eq_ignore_ascii_case(base_token_address) {
            "base"
        } else {
            "quote"
        };

        let bars = self.fetch_ohlcv(network, &pool_address, side).await?;
        if bars.is_empty() {
            return Ok(None);
        }

        let mut prices = Vec::with_capacity(bars.len());
        let mut target_price = None;
        for bar in &bars {
            if bar.len() < 5 {
                continue;
            }
            let bar_unix = bar[0] as i64;
            let close = format_price(bar[4]);
            let bar_day = dates::day_date(bar_unix);
            if bar_day == day {
                target_price = Some(close.clone());
            }
            prices.push(HistoricalPrice {
                coin_id: id.clone(),
                date: bar_unix,
                day_date: bar_day,
                price: close,
                source: "geckoterminal".to_string(),
            });
        }
        if let Err(e) = self.historical_repo.save_prices(prices).await {
            error!(error = %e, "Failed to save historical prices");
        }
        Ok(target_price)
    }

    async fn fetch_ohlcv(&self, network: &str, pool_address: &str, side: &str) -> Result<Vec<Vec<f64>>> {
        let url = format!(
            "{}/networks/{}/pools/{}/ohlcv/day?limit=1000&token={}&partner_api_key={}",
            BASE_URL, network, pool_address, side, self.api_key
        );
        let (status, body) =
            get_raw(&self.client, &url, &[("accept", "application/json")], REQUEST_TIMEOUT).await?;
        if status != StatusCode::OK {
            return Err(status_error(status, &body));
        }
        let response: OhlcvResponse = parse_json(&body)?;
        Ok(response
            .data
            .map(|d| d.attributes.ohlcv_list)
            .unwrap_or_default())
    }

    /// Batch current prices: concurrent per-coin lookups.
    pub async fn batch_current(
        &self,
        addresses: &[String],
        chain_ids: &[String],
        symbols: &[String],
        networks: &[String],
        is_cache: bool,
    ) -> Result<Vec<PriceResult>> {
        if chain_ids.len() != addresses.len() {
            return Err(SourceError::Malformed(
                "chainIds and addresses must have the same length".to_string(),
            ));
        }
        let now = dates::now_unix();
        let futures = (0..addresses.len()).map(|i| {
            let this = self.clone();
            let chain_id = chain_ids[i].clone();
            let address = addresses[i].clone();
            async move {
                let outcome = this.current_single(&chain_id, &address, is_cache).await;
                (i, outcome)
            }
        });

        let mut results: Vec<PriceResult> = (0..addresses.len())
            .map(|i| PriceResult {
                chain_id: chain_ids[i].clone(),
                address: addresses[i].clone(),
                price: None,
                symbol: get_or_none(symbols, i),
                network: get_or_none(networks, i),
                timestamp: now.to_string(),
                serial: i,
                request_status: Some("200".to_string()),
            })
            .collect();

        for (i, outcome) in join_all(futures).await {
            match outcome {
                Ok(price) => results[i].price = price,
                Err(e) => {
                    results[i].request_status = Some(e.request_status().to_string());
                }
            }
        }
        Ok(results)
    }

    /// Batch historical prices: bulk store read, then concurrent per-coin
    /// backfill for the misses.
    pub async fn batch_historical(
        &self,
        addresses: &[String],
        chain_ids: &[String],
        symbols: &[String],
        networks: &[String],
        unix_dates: &[i64],
    ) -> Result<Vec<PriceResult>> {
        if chain_ids.len() != addresses.len() || addresses.len() != unix_dates.len() {
            return Err(SourceError::Malformed(
                "chainIds, addresses and dates must have the same length".to_string(),
            ));
        }

        let ids: Vec<String> = addresses
            .iter()
            .zip(chain_ids)
            .map(|(addr, chain)| coin_id(chain, addr))
            .collect();
        let existing = self.historical_repo.get_prices(&ids, unix_dates).await?;

        let futures = (0..addresses.len()).map(|i| {
            let this = self.clone();
            let chain_id = chain_ids[i].clone();
            let address = addresses[i].clone();
            let id = ids[i].clone();
            let unix_date = unix_dates[i];
            let cached = existing
                .get(&format!("{}_{}", id, dates::day_date(unix_date)))
                .cloned();
            async move {
                match cached {
                    Some(price) => (i, Ok(Some(price))),
                    None => (i, this.historical_single(&chain_id, &address, unix_date).await),
                }
            }
        });

        let mut results: Vec<PriceResult> = (0..addresses.len())
            .map(|i| PriceResult {
                chain_id: chain_ids[i].clone(),
                address: addresses[i].clone(),
                price: None,
                symbol: get_or_none(symbols, i),
                network: get_or_none(networks, i),
                timestamp: unix_dates[i].to_string(),
                serial: i,
                request_status: Some("200".to_string()),
            })
            .collect();

        for (i, outcome) in join_all(futures).await {
            match outcome {
                Ok(price) => results[i].price = price,
                Err(e) => {
                    results[i].request_status = Some(e.request_status().to_string());
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_for_chain() {
        assert_eq!(network_for_chain("1"), Some("eth"));
        assert_eq!(network_for_chain("42161"), Some("arbitrum"));
        assert_eq!(network_for_chain("8453"), Some("base"));
        assert_eq!(network_for_chain("999999"), None);
    }

    #[test]
    fn test_extract_address_takes_last_segment() {
        assert_eq!(extract_address("eth_0xabc"), "0xabc");
        assert_eq!(extract_address("polygon_pos_0xdef"), "0xdef");
        assert_eq!(extract_address("0xplain"), "0xplain");
    }
}
