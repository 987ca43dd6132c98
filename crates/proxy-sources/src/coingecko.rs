use crate::config::SourcesConfig;
use crate::http::{format_price, get_raw, parse_json, status_error, DEFAULT_TIMEOUT};
use crate::{Result, SourceError};
use proxy_core::dates;
use proxy_core::types::{coin_id, get_or_none, PriceResult};
use proxy_db::models::{Coin, HistoricalPrice};
use proxy_db::repositories::{CoinRepository, HistoricalPriceRepository};
use proxy_redis::RedisConnection;
use proxy_throttle::AlertNotifier;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sqlx::types::Json;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{error, info};

const BASE_URL: &str = "https://pro-api.coingecko.com/api/v3";
const LIST_TIMEOUT: Duration = Duration::from_secs(15);

const ASSET_PLATFORMS_KEY: &str = "coingecko:asset_platforms";
const ASSET_PLATFORMS_BY_CHAIN_KEY: &str = "coingecko:asset_platforms_chain_id_map";
const PLATFORMS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const COINS_LIST_TTL: Duration = Duration::from_secs(72 * 60 * 60);

#[derive(Debug, Deserialize)]
struct AssetPlatform {
    id: String,
    chain_identifier: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListedCoin {
    id: String,
    symbol: String,
    name: String,
    #[serde(default)]
    platforms: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    market_data: Option<HistoryMarketData>,
}

#[derive(Debug, Deserialize)]
struct HistoryMarketData {
    #[serde(default)]
    current_price: HashMap<String, f64>,
}

/// Coingecko adapter: id-keyed batch current prices, by-date historical
/// lookups, and the full coin-list sync.
#[derive(Clone)]
pub struct CoingeckoSource {
    client: Client,
    api_key: String,
    redis: RedisConnection,
    coin_repo: CoinRepository,
    historical_repo: HistoricalPriceRepository,
    notifier: AlertNotifier,
}

impl CoingeckoSource {
    pub fn new(
        config: &SourcesConfig,
        redis: RedisConnection,
        coin_repo: CoinRepository,
        historical_repo: HistoricalPriceRepository,
        notifier: AlertNotifier,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: config.coingecko_api_key.clone(),
            redis,
            coin_repo,
            historical_repo,
            notifier,
        }
    }

    fn headers(&self) -> [(&str, &str); 2] {
        [("accept", "application/json"), ("x-cg-pro-api-key", &self.api_key)]
    }

    async fn fetch_asset_platforms(&self) -> Result<Vec<AssetPlatform>> {
        let url = format!("{}/asset_platforms", BASE_URL);
        let (status, body) = get_raw(&self.client, &url, &self.headers(), LIST_TIMEOUT).await?;
        if status != StatusCode::OK {
            return Err(status_error(status, &body));
        }
        parse_json(&body)
    }

    /// Map `asset_platform_id -> chain_id` (platforms without a numeric
    /// chain identifier map to themselves). Cached 24 h.
    pub async fn asset_platforms(&self, is_cache: bool) -> Result<HashMap<String, String>> {
        if is_cache {
            if let Some(map) = self
                .redis
                .get_json::<HashMap<String, String>>(ASSET_PLATFORMS_KEY)
                .await?
            {
                return Ok(map);
            }
        }

        let platforms = self.fetch_asset_platforms().await?;
        let mut map = HashMap::with_capacity(platforms.len());
        for platform in platforms {
            match platform.chain_identifier {
                Some(chain_id) => map.insert(platform.id, chain_id.to_string()),
                None => map.insert(platform.id.clone(), platform.id),
            };
        }
        self.redis
            .set_json(ASSET_PLATFORMS_KEY, &map, PLATFORMS_TTL)
            .await
            .ok();
        Ok(map)
    }

    /// Inverse map `chain_id -> asset_platform_id`. Cached 24 h.
    pub async fn asset_platforms_by_chain(&self, is_cache: bool) -> Result<HashMap<String, String>> {
        if is_cache {
            if let Some(map) = self
                .redis
                .get_json::<HashMap<String, String>>(ASSET_PLATFORMS_BY_CHAIN_KEY)
                .await?
            {
                return Ok(map);
            }
        }

        let platforms = self.fetch_asset_platforms().await?;
        let mut map = HashMap::new();
        for platform in platforms {
            if let Some(chain_id) = platform.chain_identifier {
                map.insert(chain_id.to_string(), platform.id);
            }
        }
        self.redis
            .set_json(ASSET_PLATFORMS_BY_CHAIN_KEY, &map, PLATFORMS_TTL)
            .await
            .ok();
        Ok(map)
    }

    /// Asset platform id for a chain id.
    pub async fn platform_for_chain(&self, chain_id: &str) -> Result<String> {
        let map = self.asset_platforms_by_chain(true).await?;
        map.get(chain_id)
            .cloned()
            .ok_or_else(|| SourceError::Malformed(format!("asset platform for chain {} not found", chain_id)))
    }

    /// Full coin list mapped through the platform map, deduplicated by id.
    /// Cached 72 h.
    pub async fn coins_list(&self, use_cache: bool) -> Result<Vec<Coin>> {
        if use_cache {
            if let Some(coins) = self
                .redis
                .get_json::<Vec<Coin>>(proxy_redis::keys::COINS_LIST)
                .await?
            {
                info!(count = coins.len(), "Fetched coins list from cache");
                return Ok(coins);
            }
        }

        let platform_map = self.asset_platforms(true).await?;

        let url = format!("{}/coins/list?include_platform=true", BASE_URL);
        let (status, body) = get_raw(&self.client, &url, &self.headers(), LIST_TIMEOUT).await?;
        if status != StatusCode::OK {
            return Err(status_error(status, &body));
        }
        let listed: Vec<ListedCoin> = parse_json(&body)?;

        let mut coins = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for entry in &listed {
            for (platform_name, address) in &entry.platforms {
                if address.is_empty() {
                    continue;
                }
                let Some(chain_id) = platform_map.get(platform_name) else {
                    continue;
                };
                let id = coin_id(chain_id, address);
                if !seen.insert(id.clone()) {
                    continue;
                }
                coins.push(Coin {
                    id,
                    address: address.to_lowercase(),
                    chain_id: chain_id.clone(),
                    symbol: Some(entry.symbol.clone()),
                    name: Some(entry.name.clone()),
                    coingecko_coin_id: Some(entry.id.clone()),
                    coingecko_platforms: Some(Json(entry.platforms.clone())),
                    price_source: Some("coingecko".to_string()),
                    ..Default::default()
                });
            }
        }

        self.redis
            .set_json(proxy_redis::keys::COINS_LIST, &coins, COINS_LIST_TTL)
            .await
            .ok();
        Ok(coins)
    }

    /// Re-fetch the full list and upsert it.
    pub async fn sync_coins(&self) -> Result<()> {
        let coins = self.coins_list(false).await?;
        info!(count = coins.len(), "Syncing coin list");
        self.coin_repo.upsert_coins(&coins).await?;
        Ok(())
    }

    /// Batch current prices: one call with a comma-separated upstream-id
    /// list covering every coin the cache could not answer.
    pub async fn batch_current(
        &self,
        addresses: &[String],
        chain_ids: &[String],
        symbols: &[String],
        networks: &[String],
        is_cache: bool,
    ) -> Result<Vec<PriceResult>> {
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

        let coins = self.coin_repo.get_by_ids(&ids).await?;
        let mut coins_map: HashMap<String, Coin> = HashMap::with_capacity(coins.len());
        let mut gecko_ids: Vec<String> = Vec::new();
        let mut gecko_id_map: HashMap<String, String> = HashMap::new();
        for coin in coins {
            if coin.id.is_empty() {
                continue;
            }
            if let Some(gecko_id) = coin.coingecko_coin_id.clone() {
                if !cached.contains_key(&coin.id) || !is_cache {
                    gecko_ids.push(gecko_id.clone());
                    gecko_id_map.insert(coin.id.clone(), gecko_id);
                }
            }
            coins_map.insert(coin.id.clone(), coin);
        }

        let mut price_map: HashMap<String, HashMap<String, f64>> = HashMap::new();
        if !gecko_ids.is_empty() {
            let url = format!(
                "{}/simple/price?ids={}&vs_currencies=usd",
                BASE_URL,
                gecko_ids.join("%2C")
            );
            let (status, body) =
                get_raw(&self.client, &url, &self.headers(), DEFAULT_TIMEOUT).await?;
            if status != StatusCode::OK {
                let err = status_error(status, &body);
                if !matches!(err, SourceError::RateLimited) {
                    self.notifier
                        .report_upstream_error(
                            "CoingeckoSource-batch_current",
                            &format!("url: {}, status: {}", url, status),
                        )
                        .await;
                }
                return Err(err);
            }
            price_map = parse_json(&body)?;
        }

        let mut results = Vec::with_capacity(addresses.len());
        let mut prices_to_save = Vec::new();
        for (i, address) in addresses.iter().enumerate() {
            let id = &ids[i];
            let mut price = cached.get(id).cloned();

            if price.is_none() {
                if let Some(gecko_id) = gecko_id_map.get(id) {
                    if let Some(usd) = price_map.get(gecko_id).and_then(|p| p.get("usd")) {
                        let price_str = format_price(*usd);
                        price = Some(price_str.clone());

                        self.redis.set_current_price(id, &price_str).await.ok();

                        // Historical writes go under the canonical record id.
                        let canonical = coins_map
                            .get(id)
                            .map(|c| coin_id(&c.chain_id, &c.address))
                            .unwrap_or_else(|| id.clone());
                        prices_to_save.push(HistoricalPrice::new(
                            canonical,
                            now,
                            price_str,
                            "coingecko",
                        ));
                    }
                }
            }

            results.push(PriceResult {
                chain_id: chain_ids[i].clone(),
                address: address.clone(),
                price,
                symbol: get_or_none(symbols, i),
                network: get_or_none(networks, i),
                timestamp: now.to_string(),
                serial: i,
                request_status: None,
            });
        }

        if let Err(e) = self.historical_repo.save_prices(prices_to_save).await {
            error!(error = %e, "Failed to save historical prices");
        }
        Ok(results)
    }

    /// Batch historical prices: store first, then a per-coin by-date call;
    /// today's dates delegate to the current-price path.
    pub async fn batch_historical(
        &self,
        addresses: &[String],
        chain_ids: &[String],
        symbols: &[String],
        networks: &[String],
        unix_dates: &[i64],
    ) -> Result<Vec<PriceResult>> {
        let ids: Vec<String> = addresses
            .iter()
            .zip(chain_ids)
            .map(|(addr, chain)| coin_id(chain, addr))
            .collect();

        let coins = self.coin_repo.get_by_ids(&ids).await?;
        let mut coin_map: HashMap<String, Coin> = HashMap::new();
        for coin in coins {
            if !coin.id.is_empty() && coin.coingecko_coin_id.is_some() {
                coin_map.insert(coin.id.clone(), coin);
            }
        }

        let existing = self.historical_repo.get_prices(&ids, unix_dates).await?;

        let today = dates::today_day_date();
        let mut results = Vec::with_capacity(addresses.len());
        let mut prices_to_save = Vec::new();

        for (i, id) in ids.iter().enumerate() {
            let day = dates::day_date(unix_dates[i]);
            let mut price = existing.get(&format!("{}_{}", id, day)).cloned();

            if price.is_none() {
                if let Some(coin) = coin_map.get(id) {
                    if day == today {
                        let current = self
                            .batch_current(
                                &addresses[i..=i],
                                &chain_ids[i..=i],
                                &[proxy_core::types::get_or_default(symbols, i)],
                                &[proxy_core::types::get_or_default(networks, i)],
                                true,
                            )
                            .await;
                        if let Ok(mut rows) = current {
                            price = rows.pop().and_then(|r| r.price);
                        }
                    } else if let Some(gecko_id) = coin.coingecko_coin_id.as_deref() {
                        let url = format!("{}/coins/{}/history?date={}", BASE_URL, gecko_id, day);
                        let (status, body) =
                            get_raw(&self.client, &url, &self.headers(), DEFAULT_TIMEOUT).await?;
                        if status != StatusCode::OK {
                            let err = status_error(status, &body);
                            if !matches!(err, SourceError::RateLimited) {
                                self.notifier
                                    .report_upstream_error(
                                        "CoingeckoSource-batch_historical",
                                        &format!("url: {}, status: {}", url, status),
                                    )
                                    .await;
                            }
                            return Err(err);
                        }
                        let history: HistoryResponse = parse_json(&body)?;
                        if let Some(usd) = history
                            .market_data
                            .as_ref()
                            .and_then(|m| m.current_price.get("usd"))
                        {
                            let price_str = format_price(*usd);
                            price = Some(price_str.clone());
                            let canonical = coin_id(&coin.chain_id, &coin.address);
                            prices_to_save.push(HistoricalPrice {
                                coin_id: canonical,
                                date: unix_dates[i],
                                day_date: day.clone(),
                                price: price_str,
                                source: "coingecko".to_string(),
                            });
                        }
                    }
                }
            }

            results.push(PriceResult {
                chain_id: chain_ids[i].clone(),
                address: addresses[i].clone(),
                price,
                symbol: get_or_none(symbols, i),
                network: get_or_none(networks, i),
                timestamp: unix_dates[i].to_string(),
                serial: i,
                request_status: None,
            });
        }

        if let Err(e) = self.historical_repo.save_prices(prices_to_save).await {
            error!(error = %e, "Failed to save historical prices");
        }
        Ok(results)
    }

    pub async fn single_current(
        &self,
        chain_id: &str,
        address: &str,
        symbol: &str,
        network: &str,
        is_cache: bool,
    ) -> Result<Option<String>> {
        let mut rows = self
            .batch_current(
                &[address.to_string()],
                &[chain_id.to_string()],
                &[symbol.to_string()],
                &[network.to_string()],
                is_cache,
            )
            .await?;
        Ok(rows.pop().and_then(|r| r.price))
    }

    pub async fn single_historical(
        &self,
        unix_date: i64,
        chain_id: &str,
        address: &str,
        symbol: &str,
        network: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .batch_historical(
                &[address.to_string()],
                &[chain_id.to_string()],
                &[symbol.to_string()],
                &[network.to_string()],
                &[unix_date],
            )
            .await?;
        Ok(rows.pop().and_then(|r| r.price))
    }
}
