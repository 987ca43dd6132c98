use crate::coingecko::CoingeckoSource;
use crate::config::SourcesConfig;
use crate::http::{format_price, get_raw, parse_json, status_error, DEFAULT_TIMEOUT};
use crate::symbols::is_symbol_allowed;
use crate::{Result, SourceError};
use futures::future::join_all;
use proxy_core::dates;
use proxy_core::types::{coin_id, get_or_default, get_or_none, PriceResult};
use proxy_db::models::{Coin, HistoricalPrice};
use proxy_db::repositories::{CoinRepository, HistoricalPriceRepository};
use proxy_redis::RedisConnection;
use proxy_throttle::AlertNotifier;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error};

const BASE_URL: &str = "https://pro-api.coingecko.com/api/v3";

const NETWORKS_KEY: &str = "coinGeckoOnChain:supported_networks";
const NETWORKS_TTL: Duration = Duration::from_secs(72 * 60 * 60);

const TOKEN_POOLS_PREFIX: &str = "coinGeckoOnChain:tokenPools:";
const TOKEN_POOLS_TTL: Duration = Duration::from_secs(1000 * 60);

#[derive(Debug, Deserialize)]
struct NetworksResponse {
    #[serde(default)]
    data: Vec<NetworkEntry>,
}

#[derive(Debug, Deserialize)]
struct NetworkEntry {
    id: String,
    attributes: NetworkAttributes,
}

#[derive(Debug, Deserialize)]
struct NetworkAttributes {
    #[serde(default)]
    coingecko_asset_platform_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenPriceResponse {
    data: Option<TokenPriceData>,
}

#[derive(Debug, Deserialize)]
struct TokenPriceData {
    attributes: TokenPriceAttributes,
}

#[derive(Debug, Deserialize)]
struct TokenPriceAttributes {
    #[serde(default)]
    token_prices: HashMap<String, String>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct PoolEntry {
    attributes: PoolAttributes,
    relationships: PoolRelationships,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct PoolAttributes {
    address: String,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct PoolRelationships {
    quote_token: QuoteToken,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct QuoteToken {
    data: QuoteTokenRef,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct QuoteTokenRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PoolsResponse {
    #[serde(default)]
    data: Vec<PoolEntry>,
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

/// Coingecko on-chain adapter, gated by the symbol allow-list. Network
/// discovery goes through the upstream `/networks` listing.
#[derive(Clone)]
pub struct CoingeckoOnChainSource {
    client: Client,
    api_key: String,
    redis: RedisConnection,
    coin_repo: CoinRepository,
    historical_repo: HistoricalPriceRepository,
    coingecko: CoingeckoSource,
    notifier: AlertNotifier,
}

impl CoingeckoOnChainSource {
    pub fn new(
        config: &SourcesConfig,
        redis: RedisConnection,
        coin_repo: CoinRepository,
        historical_repo: HistoricalPriceRepository,
        coingecko: CoingeckoSource,
        notifier: AlertNotifier,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: config.coingecko_onchain_api_key.clone(),
            redis,
            coin_repo,
            historical_repo,
            coingecko,
            notifier,
        }
    }

    /// Insert a minimal coin record when the store has never seen this coin.
    async fn ensure_coin_exists(&self, chain_id: &str, address: &str, symbol: &str) -> Result<()> {
        let id = coin_id(chain_id, address);
        if self.coin_repo.check_coin_exists(&id).await? {
            return Ok(());
        }
        let symbol = if symbol.is_empty() {
            None
        } else {
            Some(symbol.to_string())
        };
        let coin = Coin::minimal(chain_id, address, symbol, None, None, None, "coinGeckoOnChain");
        self.coin_repo.upsert_coins(&[coin]).await?;
        Ok(())
    }

    fn headers(&self) -> [(&str, &str); 2] {
        [("accept", "application/json"), ("x-cg-pro-api-key", &self.api_key)]
    }

    /// Resolve an asset-platform id to the on-chain network id. Unknown
    /// platforms fall back to the platform id itself.
    pub async fn network_for_platform(&self, platform_id: &str, is_cache: bool) -> Result<String> {
        if is_cache {
            if let Some(map) = self
                .redis
                .get_json::<HashMap<String, String>>(NETWORKS_KEY)
                .await?
            {
                return Ok(map
                    .get(platform_id)
                    .cloned()
                    .unwrap_or_else(|| platform_id.to_string()));
            }
        }

        let url = format!("{}/onchain/networks", BASE_URL);
        let (status, body) = get_raw(&self.client, &url, &self.headers(), DEFAULT_TIMEOUT).await?;
        if status != StatusCode::OK {
            return Err(status_error(status, &body));
        }
        let response: NetworksResponse = parse_json(&body)?;

        let mut map = HashMap::new();
        let mut found = None;
        for network in response.data {
            if let Some(platform) = network.attributes.coingecko_asset_platform_id {
                if platform == platform_id {
                    found = Some(network.id.clone());
                }
                map.insert(platform, network.id);
            }
        }
        if is_cache {
            self.redis.set_json(NETWORKS_KEY, &map, NETWORKS_TTL).await.ok();
        }

        Ok(found.unwrap_or_else(|| {
            debug!(platform = %platform_id, "On-chain network not found, using platform id");
            platform_id.to_string()
        }))
    }

    /// Current price, allow-listed symbols only.
    pub async fn current_single(
        &self,
        chain_id: &str,
        address: &str,
        symbol: &str,
        is_cache: bool,
    ) -> Result<Option<String>> {
        if symbol.is_empty() || !is_symbol_allowed(symbol) {
            return Ok(None);
        }
        let platform = self.coingecko.platform_for_chain(chain_id).await?;
        let network = self.network_for_platform(&platform, true).await?;
        let id = coin_id(chain_id, address);

        if is_cache {
            if let Some(price) = self.redis.get_current_price(&id).await? {
                if !price.is_empty() {
                    return Ok(Some(price));
                }
            }
        }

        let url = format!(
            "{}/onchain/simple/networks/{}/token_price/{}",
            BASE_URL, network, address
        );
        let (status, body) = get_raw(&self.client, &url, &self.headers(), DEFAULT_TIMEOUT).await?;
        if status != StatusCode::OK {
            let err = status_error(status, &body);
            if !matches!(err, SourceError::RateLimited) {
                self.notifier
                    .report_upstream_error(
                        "CoingeckoOnChainSource-current_single",
                        &format!("url: {}, status: {}", url, status),
                    )
                    .await;
            }
            return Err(err);
        }

        let response: TokenPriceResponse = parse_json(&body)?;
        let Some(price) = response
            .data
            .and_then(|d| d.attributes.token_prices.get(address).cloned())
        else {
            return Ok(None);
        };

        self.redis.set_current_price(&id, &price).await.ok();
        if let Err(e) = self.ensure_coin_exists(chain_id, address, symbol).await {
            error!(error = %e, coin_id = %id, "Failed to insert minimal coin record");
        }
        let record = HistoricalPrice::new(id, dates::now_unix(), price.clone(), "coinGeckoOnChain");
        if let Err(e) = self.historical_repo.save_prices(vec![record]).await {
            error!(error = %e, "Failed to save historical price");
        }
        Ok(Some(price))
    }

    /// Historical price via the token's top on-chain pool.
    pub async fn historical_single(
        &self,
        chain_id: &str,
        address: &str,
        unix_date: i64,
    ) -> Result<Option<String>> {
        let platform = self.coingecko.platform_for_chain(chain_id).await?;
        let network = self.network_for_platform(&platform, true).await?;
        let id = coin_id(chain_id, address);
        let day = dates::day_date(unix_date);

        let existing = self.historical_repo.get_prices(&[id.clone()], &[unix_date]).await?;
        if let Some(price) = existing.get(&format!("{}_{}", id, day)) {
            return Ok(Some(price.clone()));
        }

        let pools_key = format!("{}{}:{}", TOKEN_POOLS_PREFIX, network, address);
        let pools: Vec<PoolEntry> = match self.redis.get_string(&pools_key).await? {
            Some(raw) => parse_json(&raw)?,
            None => {
                let url = format!(
                    "{}/onchain/networks/{}/tokens/{}/pools",
                    BASE_URL, network, address
                );
                let (status, body) =
                    get_raw(&self.client, &url, &self.headers(), DEFAULT_TIMEOUT).await?;
                if status != StatusCode::OK {
                    let err = status_error(status, &body);
                    if !matches!(err, SourceError::RateLimited) {
                        self.notifier
                            .report_upstream_error(
                                "CoingeckoOnChainSource-historical_single",
                                &format!("url: {}, status: {}", url, status),
                            )
                            .await;
                    }
                    return Err(err);
                }
                let response: PoolsResponse = parse_json(&body)?;
                if let Ok(raw) = serde_json::to_string(&response.data) {
                    self.redis.set_string(&pools_key, &raw, TOKEN_POOLS_TTL).await.ok();
                }
                response.data
            }
        };

        let Some(pool) = pools.first() else {
            return Ok(None);
        };
        let pool_address = pool.attributes.address.clone();
        let quote_address = pool
            .relationships
            .quote_token
            .data
            .id
            .rsplit('_')
            .next()
            .unwrap_or_default();
        let side = if address.eq_ignore_ascii_case(quote_address) {
            "quote"
        } else {
            "base"
        };

        let url = format!(
            "{}/onchain/networks/{}/pools/{}/ohlcv/day?limit=1000&token={}",
            BASE_URL, network, pool_address, side
        );
        let (status, body) = get_raw(&self.client, &url, &self.headers(), DEFAULT_TIMEOUT).await?;
        if status != StatusCode::OK {
            return Err(status_error(status, &body));
        }
        let response: OhlcvResponse = parse_json(&body)?;
        let bars = response
            .data
            .map(|d| d.attributes.ohlcv_list)
            .unwrap_or_default();
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
                source: "coinGeckoOnChain".to_string(),
            });
        }
        if let Err(e) = self.historical_repo.save_prices(prices).await {
            error!(error = %e, "Failed to save historical prices");
        }
        Ok(target_price)
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
            let symbol = get_or_default(symbols, i);
            async move {
                (i, this.current_single(&chain_id, &address, &symbol, is_cache).await)
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
                request_status: None,
            })
            .collect();

        for (i, outcome) in join_all(futures).await {
            match outcome {
                Ok(price) => results[i].price = price,
                Err(e) => {
                    error!(error = %e, "Failed to fetch on-chain current price");
                    results[i].request_status = Some(e.request_status().to_string());
                }
            }
        }
        Ok(results)
    }

    /// Batch historical prices: bulk store read, concurrent backfill.
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
            let unix_date = unix_dates[i];
            let cached = existing
                .get(&format!("{}_{}", ids[i], dates::day_date(unix_date)))
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
                request_status: None,
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
