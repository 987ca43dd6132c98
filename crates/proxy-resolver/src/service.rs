use crate::coalesce::CoalescingEngine;
use crate::resolver::PriceResolver;
use crate::Result;
use proxy_core::types::PriceResult;
use std::sync::Arc;

/// Entry point the HTTP layer talks to: routes reads through the coalescing
/// engine when the caller allows it, otherwise straight to the resolver.
#[derive(Clone)]
pub struct PriceService {
    resolver: PriceResolver,
    engine: Arc<CoalescingEngine>,
}

impl PriceService {
    pub fn new(resolver: PriceResolver, engine: Arc<CoalescingEngine>) -> Self {
        Self { resolver, engine }
    }

    /// Single current price. `use_cache = false` or `exclude_route = false`
    /// bypasses coalescing.
    pub async fn get_price(
        &self,
        chain_id: &str,
        address: &str,
        symbol: &str,
        network: &str,
        use_cache: bool,
        exclude_route: bool,
    ) -> Result<Option<String>> {
        if !use_cache || !exclude_route {
            let mut results = self
                .resolver
                .fetch_batch_current(
                    &[chain_id.to_string()],
                    &[address.to_string()],
                    &[symbol.to_string()],
                    &[network.to_string()],
                    use_cache,
                    exclude_route,
                )
                .await?;
            return Ok(results.pop().and_then(|r| r.price));
        }
        self.engine
            .get_single(chain_id, address, symbol, network, exclude_route)
            .await
    }

    /// Batch current prices; same bypass rule as `get_price`.
    pub async fn get_batch_price(
        &self,
        chain_ids: &[String],
        addresses: &[String],
        symbols: &[String],
        networks: &[String],
        is_cache: bool,
        exclude_route: bool,
    ) -> Result<Vec<PriceResult>> {
        if !is_cache || !exclude_route {
            return self
                .resolver
                .fetch_batch_current(chain_ids, addresses, symbols, networks, is_cache, exclude_route)
                .await;
        }
        self.engine
            .get_batch(chain_ids, addresses, symbols, networks, exclude_route)
            .await
    }

    /// Single historical price.
    pub async fn get_historical_price(
        &self,
        chain_id: &str,
        address: &str,
        symbol: &str,
        network: &str,
        unix_date: i64,
    ) -> Result<Option<String>> {
        self.resolver
            .fetch_historical_single(chain_id, address, symbol, network, unix_date)
            .await
    }

    /// Batch historical prices.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_batch_historical_price(
        &self,
        chain_ids: &[String],
        addresses: &[String],
        symbols: &[String],
        networks: &[String],
        unix_dates: &[i64],
        dates_str: &[String],
    ) -> Result<Vec<PriceResult>> {
        self.resolver
            .fetch_batch_historical(chain_ids, addresses, symbols, networks, unix_dates, dates_str)
            .await
    }
}
