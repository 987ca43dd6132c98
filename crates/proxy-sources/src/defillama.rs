use crate::config::SourcesConfig;
use crate::http::{format_price, get_raw, parse_json, status_error};
use crate::{Result, SourceError};
use futures::future::join_all;
use proxy_core::dates;
use proxy_core::types::{coin_id, get_or_none, PriceResult};
use proxy_db::models::{Coin, HistoricalPrice};
use proxy_db::repositories::{CoinRepository, HistoricalPriceRepository};
use proxy_redis::RedisConnection;
use proxy_throttle::AlertNotifier;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error};

const BASE_URL: &str = "https://coins.llama.fi";
const CHAINS_URL: &str = "https://api.llama.fi/v2/chains";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const CHAIN_NAMES_KEY: &str = "defiLlama:chainNamesAndTVL";
const CHAIN_NAMES_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Current-price batches are partitioned into groups of this size and
/// fanned out concurrently.
const BATCH_GROUP_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct ChainEntry {
    name: String,
    #[serde(rename = "chainId", default)]
    chain_id: Option<serde_json::Value>,
    #[serde(default)]
    tvl: f64,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    price: f64,
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct PricesResponse {
    #[serde(default)]
    coins: HashMap<String, PriceEntry>,
}

/// Defillama adapter. Chain ids map to defillama chain names via a
/// TVL-ranked list (duplicates resolve to the highest-TVL chain).
#[derive(Clone)]
pub struct DefillamaSource {
    client: Client,
    redis: RedisConnection,
    coin_repo: CoinRepository,
    historical_repo: HistoricalPriceRepository,
    notifier: AlertNotifier,
    chain_names: Arc<RwLock<HashMap<String, String>>>,
}

impl DefillamaSource {
    pub fn new(
        _config: &SourcesConfig,
        redis: RedisConnection,
        coin_repo: CoinRepository,
        historical_repo: HistoricalPriceRepository,
        notifier: AlertNotifier,
    ) -> Self {
        Self {
            client: Client::new(),
            redis,
            coin_repo,
            historical_repo,
            notifier,
            chain_names: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn initialize_chain_names(&self) {
        if let Ok(Some(map)) = self
            .redis
            .get_json::<HashMap<String, String>>(CHAIN_NAMES_KEY)
            .await
        {
            if !map.is_empty() {
                *self.chain_names.write().await = map;
                return;
            }
        }

        let response = match get_raw(
            &self.client,
            CHAINS_URL,
            &[("accept", "application/json")],
            REQUEST_TIMEOUT,
        )
        .await
        {
            Ok((status, body)) if status == StatusCode::OK => body,
            Ok((status, _)) => {
                error!(status = %status, "Defillama chains request failed");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch chain names from defillama");
                return;
            }
        };

        let chains: Vec<ChainEntry> = match parse_json(&response) {
            Ok(chains) => chains,
            Err(e) => {
                error!(error = %e, "Failed to decode defillama chains response");
                return;
            }
        };

        let mut names: HashMap<String, String> = HashMap::new();
        let mut tvl_by_chain: HashMap<String, f64> = HashMap::new();
        for chain in chains {
            let id = match chain.chain_id {
                Some(serde_json::Value::String(s)) if !s.is_empty() => s,
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            let known_tvl = tvl_by_chain.get(&id).copied();
            if known_tvl.map(|tvl| chain.tvl > tvl).unwrap_or(true) {
                names.insert(id.clone(), chain.name);
                tvl_by_chain.insert(id, chain.tvl);
            }
        }

        self.redis
            .set_json(CHAIN_NAMES_KEY, &names, CHAIN_NAMES_TTL)
            .await
            .ok();
        *self.chain_names.write().await = names;
    }

    async fn chain_name_for(&self, chain_id: &str) -> Option<String> {
        {
            let names = self.chain_names.read().await;
            if !names.is_empty() {
                return names.get(chain_id).cloned();
            }
        }
        self.initialize_chain_names().await;
        let names = self.chain_names.read().await;
        let name = names.get(chain_id).cloned();
        if name.is_none() {
            debug!(chain_id = %chain_id, "Defillama chain id not found");
        }
        name
    }

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
        let coin = Coin::minimal(chain_id, address, symbol, None, None, None, "defillama");
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
        let Some(chain_name) = self.chain_name_for(chain_id).await else {
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

        let token_key = format!("{}:{}", chain_name, address);
        let url = format!("{}/prices/current/{}", BASE_URL, token_key);
        let (status, body) = get_raw(
            &self.client,
            &url,
            &[("accept", "application/json")],
            REQUEST_TIMEOUT,
        )
        .await?;
        if status != StatusCode::OK {
            let err = status_error(status, &body);
            if !matches!(err, SourceError::RateLimited) {
                self.notifier
                    .report_upstream_error(
                        "DefillamaSource-current_single",
                        &format!("url: {}, status: {}", url, status),
                    )
                    .await;
            }
            return Err(err);
        }

        let response: PricesResponse = parse_json(&body)?;
        let Some(entry) = response.coins.get(&token_key) else {
            debug!(token = %token_key, "Defillama price not found");
            return Ok(None);
        };
        let price = format_price(entry.price);

        self.ensure_coin_exists(chain_id, address, &entry.symbol).await?;
        self.redis.set_current_price(&id, &price).await.ok();
        let record = HistoricalPrice::new(id, dates::now_unix(), price.clone(), "defillama");
        if let Err(e) = self.historical_repo.save_prices(vec![record]).await {
            error!(error = %e, "Failed to save historical price");
        }
        Ok(Some(price))
    }

    /// Historical price for one (token, unix date).
    pub async fn historical_single(
        &self,
        chain_id: &str,
        address: &str,
        unix_date: i64,
    ) -> Result<Option<String>> {
        let Some(chain_name) = self.chain_name_for(chain_id).await else {
            return Ok(None);
        };
        let id = coin_id(chain_id, address);
        let day = dates::day_date(unix_date);

        let existing = self.historical_repo.get_prices(&[id.clone()], &[unix_date]).await?;
        if let Some(price) = existing.get(&format!("{}_{}", id, day)) {
            return Ok(Some(price.clone()));
        }

        let token_key = format!("{}:{}", chain_name, address);
        let url = format!("{}/prices/historical/{}/{}", BASE_URL, unix_date, token_key);
        let (status, body) = get_raw(
            &self.client,
            &url,
            &[("accept", "application/json")],
            REQUEST_TIMEOUT,
        )
        .await?;
        if status != StatusCode::OK {
            let err = status_error(status, &body);
            if !matches!(err, SourceError::RateLimited) {
                self.notifier
                    .report_upstream_error(
                        "DefillamaSource-historical_single",
                        &format!("url: {}, status: {}", url, status),
                    )
                    .await;
            }
            return Err(err);
        }

        let response: PricesResponse = parse_json(&body)?;
        let Some(entry) = response.coins.get(&token_key) else {
            debug!(token = %token_key, date = unix_date, "Defillama historical price not found");
            return Ok(None);
        };
        let price = format_price(entry.price);

        self.ensure_coin_exists(chain_id, address, &entry.symbol).await?;
        let record = HistoricalPrice {
            coin_id: id,
            date: unix_date,
            day_date: day,
            price: price.clone(),
            source: "defillama".to_string(),
        };
        if let Err(e) = self.historical_repo.save_prices(vec![record]).await {
            error!(error = %e, "Failed to save historical price");
        }
        Ok(Some(price))
    }

    /// Batch current prices: cache first, then uncached tokens partitioned
    /// into groups of 50, one comma-joined request per group, fanned out
    /// concurrently and merged.
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

        let ids: Vec<String> = addresses
            .iter()
            .zip(chain_ids)
            .map(|(addr, chain)| coin_id(chain, addr))
            .collect();

        let cached = if is_cache {
            self.redis.get_current_prices(&ids).await?
        } else {
            HashMap::new()
        };

        let mut results: Vec<PriceResult> = (0..addresses.len())
            .map(|i| PriceResult {
                chain_id: chain_ids[i].clone(),
                address: addresses[i].clone(),
                price: cached.get(&ids[i]).cloned(),
                symbol: get_or_none(symbols, i),
                network: get_or_none(networks, i),
                timestamp: now.to_string(),
                serial: i,
                request_status: None,
            })
            .collect();

        // Tokens the cache could not answer, keyed the way the API echoes
        // them back.
        let mut to_fetch: Vec<String> = Vec::new();
        let mut index_by_token: HashMap<String, usize> = HashMap::new();
        for i in 0..addresses.len() {
            if results[i].price.is_some() {
                continue;
            }
            let Some(chain_name) = self.chain_name_for(&chain_ids[i]).await else {
                continue;
            };
            let token_key = format!("{}:{}", chain_name, addresses[i]);
            index_by_token.insert(token_key.clone(), i);
            to_fetch.push(token_key);
        }

        if to_fetch.is_empty() {
            return Ok(results);
        }

        let groups: Vec<Vec<String>> = to_fetch
            .chunks(BATCH_GROUP_SIZE)
            .map(|chunk| chunk.to_vec())
            .collect();
        let fetches = groups.into_iter().map(|group| {
            let this = self.clone();
            async move {
                let url = format!("{}/prices/current/{}", BASE_URL, group.join(","));
                match get_raw(
                    &this.client,
                    &url,
                    &[("accept", "application/json")],
                    REQUEST_TIMEOUT,
                )
                .await
                {
                    Ok((status, body)) if status == StatusCode::OK => {
                        parse_json::<PricesResponse>(&body)
                            .map(|r| r.coins)
                            .map_err(|e| {
                                error!(error = %e, "Failed to decode defillama batch response");
                                e
                            })
                            .ok()
                    }
                    Ok((status, body)) => {
                        let err = status_error(status, &body);
                        if !matches!(err, SourceError::RateLimited) {
                            this.notifier
                                .report_upstream_error(
                                    "DefillamaSource-batch_current",
                                    &format!("url: {}, status: {}", url, status),
                                )
                                .await;
                        }
                        error!(status = %status, "Defillama batch request failed");
                        None
                    }
                    Err(e) => {
                        error!(error = %e, "Defillama batch request failed");
                        None
                    }
                }
            }
        });

        let mut prices_to_save = Vec::new();
        for coins in join_all(fetches).await.into_iter().flatten() {
            for (token_key, entry) in coins {
                let Some(&i) = index_by_token.get(&token_key) else {
                    continue;
                };
                let price = format_price(entry.price);
                results[i].price = Some(price.clone());

                if let Err(e) = self
                    .ensure_coin_exists(&chain_ids[i], &addresses[i], &entry.symbol)
                    .await
                {
                    error!(error = %e, coin_id = %ids[i], "Failed to ensure coin exists");
                    continue;
                }
                self.redis.set_current_price(&ids[i], &price).await.ok();
                prices_to_save.push(HistoricalPrice::new(ids[i].clone(), now, price, "defillama"));
            }
        }
        if let Err(e) = self.historical_repo.save_prices(prices_to_save).await {
            error!(error = %e, "Failed to save historical prices");
        }
        Ok(results)
    }

    /// Batch historical prices: concurrent per-coin lookups.
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

        let futures = (0..addresses.len()).map(|i| {
            let this = self.clone();
            let chain_id = chain_ids[i].clone();
            let address = addresses[i].clone();
            let unix_date = unix_dates[i];
            async move { (i, this.historical_single(&chain_id, &address, unix_date).await) }
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
