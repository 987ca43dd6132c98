use crate::config::SourcesConfig;
use crate::http::{format_price, get_raw, status_error};
use crate::{Result, SourceError};
use futures::future::join_all;
use proxy_core::types::{coin_id, get_or_none, PriceResult};
use proxy_core::{chains, dates};
use proxy_db::models::{Coin, HistoricalPrice};
use proxy_db::repositories::{CoinRepository, HistoricalPriceRepository};
use proxy_redis::RedisConnection;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Quotes above this impact are meaningless for pricing.
const MAX_PRICE_IMPACT: f64 = 0.1;

/// Notional quoted against the target token: 100 USDT.
const QUOTE_NOTIONAL: u32 = 100;

#[derive(Debug, Deserialize)]
struct RouteEnvelope {
    status: i64,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RouteQuote {
    #[serde(rename = "resPricePerToToken")]
    res_price_per_to_token: f64,
    #[serde(rename = "priceImpact", default)]
    price_impact: f64,
}

/// `fromAmount` for the quote: `100 * 10^decimals`, built as a string to
/// stay exact for any decimals.
fn from_amount(decimals: u32) -> String {
    format!("{}{}", QUOTE_NOTIONAL, "0".repeat(decimals as usize))
}

/// Last-resort current-price source: quotes a USDT swap into the target
/// token through the route service.
#[derive(Clone)]
pub struct DodoexRouteSource {
    client: Client,
    route_url: String,
    redis: RedisConnection,
    coin_repo: CoinRepository,
    historical_repo: HistoricalPriceRepository,
}

impl DodoexRouteSource {
    pub fn new(
        config: &SourcesConfig,
        redis: RedisConnection,
        coin_repo: CoinRepository,
        historical_repo: HistoricalPriceRepository,
    ) -> Self {
        Self {
            client: Client::new(),
            route_url: config.dodoex_route_url.clone(),
            redis,
            coin_repo,
            historical_repo,
        }
    }

    /// Insert a minimal coin record when the store has never seen this
    /// coin. The route quote carries no token metadata, so only identity
    /// and the source name are recorded.
    async fn ensure_coin_exists(&self, chain_id: &str, address: &str) -> Result<()> {
        let id = coin_id(chain_id, address);
        if self.coin_repo.check_coin_exists(&id).await? {
            return Ok(());
        }
        let coin = Coin::minimal(chain_id, address, None, None, None, None, "dodoexRoute");
        self.coin_repo.upsert_coins(&[coin]).await?;
        Ok(())
    }

    /// Current price for one token, or `None` when the chain has no USDT
    /// configured, the quote failed, or the impact was too high.
    pub async fn current_single(
        &self,
        address: &str,
        chain_id: &str,
        is_cache: bool,
    ) -> Result<Option<String>> {
        let Some(usdt) = chains::usdt_address(chain_id) else {
            return Ok(None);
        };
        if usdt.address.is_empty() || usdt.decimal == 0 {
            return Ok(None);
        }
        let id = coin_id(chain_id, address);

        if is_cache {
            if let Some(price) = self.redis.get_current_price(&id).await? {
                if !price.is_empty() {
                    return Ok(Some(price));
                }
            }
        }

        let url = format!(
            "{}?fromTokenAddress={}&toTokenAddress={}&fromAmount={}&slippage=1&userAddr=0x0000000000000000000000000000000000000000&chainId={}",
            self.route_url,
            usdt.address,
            address,
            from_amount(usdt.decimal),
            chain_id
        );
        let (status, body) = get_raw(
            &self.client,
            &url,
            &[("accept", "application/json")],
            REQUEST_TIMEOUT,
        )
        .await?;
        if status != StatusCode::OK {
            return Err(status_error(status, &body));
        }

        let envelope: RouteEnvelope =
            serde_json::from_str(&body).map_err(|e| SourceError::Malformed(e.to_string()))?;
        if envelope.status != 200 {
            debug!(status = envelope.status, coin_id = %id, "Route quote rejected");
            return Ok(None);
        }
        let Some(data) = envelope.data else {
            return Ok(None);
        };
        let quote: RouteQuote =
            serde_json::from_value(data).map_err(|e| SourceError::Malformed(e.to_string()))?;

        if quote.price_impact > MAX_PRICE_IMPACT {
            debug!(impact = quote.price_impact, coin_id = %id, "Route price impact too high");
            return Ok(None);
        }

        let price = format_price(quote.res_price_per_to_token);
        self.redis.set_current_price(&id, &price).await.ok();
        if let Err(e) = self.ensure_coin_exists(chain_id, address).await {
            error!(error = %e, coin_id = %id, "Failed to insert minimal coin record");
        }
        if !price.is_empty() {
            let record = HistoricalPrice::new(id, dates::now_unix(), price.clone(), "dodoexRoute");
            if let Err(e) = self.historical_repo.save_prices(vec![record]).await {
                error!(error = %e, "Failed to save historical price");
            }
        }
        Ok(Some(price))
    }

    /// Batch current prices: concurrent per-coin quotes.
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
            async move { (i, this.current_single(&address, &chain_id, is_cache).await) }
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_amount_scales_by_decimals() {
        assert_eq!(from_amount(6), "100000000");
        assert_eq!(from_amount(18), "100000000000000000000");
        assert_eq!(from_amount(0), "100");
    }
}
