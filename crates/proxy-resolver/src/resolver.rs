use crate::config::ResolverConfig;
use crate::Result;
use proxy_core::dates;
use proxy_core::types::{coin_id, get_or_default, get_or_none, PriceResult, Source};
use proxy_db::models::Coin;
use proxy_db::repositories::CoinRepository;
use proxy_sources::{
    CoingeckoOnChainSource, CoingeckoSource, DefillamaSource, DodoexRouteSource,
    GeckoterminalSource,
};
use proxy_throttle::{AlertService, CoinsThrottler};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error};

/// Indices into the fallback set array.
const GECKO: usize = 0;
const LLAMA: usize = 1;
const TERMINAL: usize = 2;
const ONCHAIN: usize = 3;
const DODOEX: usize = 4;

struct BatchContext {
    index_by_id: HashMap<String, usize>,
    chain_ids: Vec<String>,
    addresses: Vec<String>,
    symbols: Vec<String>,
    networks: Vec<String>,
    /// Aliased id -> the record it forwards to.
    alias_of: HashMap<String, String>,
    /// Canonical id -> every id forwarding to it.
    alias_back: HashMap<String, Vec<String>>,
}

impl BatchContext {
    /// Chain/address pair actually sent upstream for one of our ids: the
    /// alias target when the record forwards, the input pair otherwise.
    fn upstream_pair(&self, id: &str, index: usize) -> (String, String) {
        match self.alias_of.get(id) {
            Some(canonical) => {
                let mut parts = canonical.splitn(2, '_');
                (
                    parts.next().unwrap_or_default().to_string(),
                    parts.next().unwrap_or_default().to_string(),
                )
            }
            None => (
                self.chain_ids[index].clone(),
                self.addresses[index].clone(),
            ),
        }
    }
}

fn alias_maps(coins: &[Coin]) -> (HashMap<String, String>, HashMap<String, Vec<String>>) {
    let mut alias_of = HashMap::new();
    let mut alias_back: HashMap<String, Vec<String>> = HashMap::new();
    for coin in coins {
        if coin.id.is_empty() || coin.chain_id.is_empty() || coin.address.is_empty() {
            continue;
        }
        let canonical = coin_id(&coin.chain_id, &coin.address);
        if coin.id != canonical {
            alias_of.insert(coin.id.clone(), canonical.clone());
            alias_back.entry(canonical).or_default().push(coin.id.clone());
        }
    }
    (alias_of, alias_back)
}

/// Split an id of the form `{chain}_{address}` back into its parts.
fn split_coin_id(id: &str) -> (String, String) {
    let mut parts = id.splitn(2, '_');
    (
        parts.next().unwrap_or_default().to_string(),
        parts.next().unwrap_or_default().to_string(),
    )
}

/// Multi-source price resolver: ordered provider fallback with per-coin
/// source pinning, alias expansion and throttle short-circuits.
#[derive(Clone)]
pub struct PriceResolver {
    coingecko: CoingeckoSource,
    geckoterminal: GeckoterminalSource,
    coingecko_onchain: CoingeckoOnChainSource,
    defillama: DefillamaSource,
    dodoex_route: DodoexRouteSource,
    coin_repo: CoinRepository,
    throttler: CoinsThrottler,
    alerts: AlertService,
    config: ResolverConfig,
}

impl PriceResolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coingecko: CoingeckoSource,
        geckoterminal: GeckoterminalSource,
        coingecko_onchain: CoingeckoOnChainSource,
        defillama: DefillamaSource,
        dodoex_route: DodoexRouteSource,
        coin_repo: CoinRepository,
        throttler: CoinsThrottler,
        alerts: AlertService,
        config: ResolverConfig,
    ) -> Self {
        Self {
            coingecko,
            geckoterminal,
            coingecko_onchain,
            defillama,
            dodoex_route,
            coin_repo,
            throttler,
            alerts,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a batch of current prices through the provider pipeline.
    /// Output order matches input order (`result[i].serial == i`).
    pub async fn fetch_batch_current(
        &self,
        chain_ids: &[String],
        addresses: &[String],
        symbols: &[String],
        networks: &[String],
        is_cache: bool,
        exclude_route: bool,
    ) -> Result<Vec<PriceResult>> {
        let lower_addresses: Vec<String> =
            addresses.iter().map(|a| a.to_lowercase()).collect();
        let ids: Vec<String> = chain_ids
            .iter()
            .zip(&lower_addresses)
            .map(|(chain, addr)| format!("{}_{}", chain, addr))
            .collect();
        let mut index_by_id = HashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            index_by_id.insert(id.clone(), i);
        }

        let coins = self.coin_repo.get_by_ids(&ids).await?;
        let mut coin_map: HashMap<String, Coin> = HashMap::with_capacity(coins.len());
        let (alias_of, alias_back) = alias_maps(&coins);
        for coin in coins {
            coin_map.insert(coin.id.clone(), coin);
        }

        let ctx = BatchContext {
            index_by_id,
            chain_ids: chain_ids.to_vec(),
            addresses: lower_addresses,
            symbols: symbols.to_vec(),
            networks: networks.to_vec(),
            alias_of,
            alias_back,
        };

        // Disjoint preferred sets (pinned source first, else the source
        // that last produced a price), plus the fallback sets.
        let mut preferred: [HashSet<String>; 3] = Default::default();
        let mut sets: [HashSet<String>; 5] = Default::default();

        for id in &ids {
            if let Some(coin) = coin_map.get(id) {
                let pinned = coin.price_source.as_deref().unwrap_or_default();
                let last = coin.last_price_source.as_deref().unwrap_or_default();
                // Pinned-on-chain ids have no preferred pass; they wait for
                // the fallback order.
                match pinned {
                    "coingecko" => {
                        preferred[0].insert(id.clone());
                    }
                    "geckoterminal" => {
                        preferred[1].insert(id.clone());
                    }
                    "coinGeckoOnChain" => {}
                    _ => match last {
                        "coingecko" => {
                            preferred[0].insert(id.clone());
                        }
                        "geckoterminal" => {
                            preferred[1].insert(id.clone());
                        }
                        "defillama" => {
                            preferred[2].insert(id.clone());
                        }
                        _ => {}
                    },
                }
                // The coingecko path needs an upstream coin id, so only
                // known coins enter its fallback set.
                sets[GECKO].insert(id.clone());
            }
            sets[TERMINAL].insert(id.clone());
            sets[LLAMA].insert(id.clone());
            sets[ONCHAIN].insert(id.clone());
            if !exclude_route {
                sets[DODOEX].insert(id.clone());
            }
        }

        let mut results: HashMap<String, PriceResult> = HashMap::new();

        // Preferred pass.
        let preferred_plan = [
            (Source::Coingecko, 0usize),
            (Source::Geckoterminal, 1),
            (Source::Defillama, 2),
        ];
        for (source, idx) in preferred_plan {
            if preferred[idx].is_empty() {
                continue;
            }
            let pending: Vec<String> = preferred[idx].iter().cloned().collect();
            let resolved = self
                .run_current_source(source, pending, &ctx, &mut results, is_cache)
                .await;
            for set in &mut sets {
                for key in &resolved {
                    set.remove(key);
                }
            }
        }

        // Fallback pass.
        let fallback_plan = [
            (Source::Coingecko, GECKO),
            (Source::Defillama, LLAMA),
            (Source::Geckoterminal, TERMINAL),
            (Source::CoinGeckoOnChain, ONCHAIN),
            (Source::DodoexRoute, DODOEX),
        ];
        for (source, idx) in fallback_plan {
            if sets[idx].is_empty() {
                continue;
            }
            let pending: Vec<String> = sets[idx].iter().cloned().collect();
            let resolved = self
                .run_current_source(source, pending, &ctx, &mut results, is_cache)
                .await;
            for set in &mut sets {
                for key in &resolved {
                    set.remove(key);
                }
            }
        }

        // Assembly: input order, original address casing, throttle
        // accounting for every id that ends without a price.
        let mut output = Vec::with_capacity(addresses.len());
        for (i, address) in addresses.iter().enumerate() {
            let key = &ids[i];
            let mut result = match results.get(key) {
                Some(found) => {
                    let mut found = found.clone();
                    found.serial = i;
                    found.symbol = get_or_none(symbols, i);
                    found.network = get_or_none(networks, i);
                    found.address = address.clone();
                    found
                }
                None => PriceResult {
                    chain_id: chain_ids[i].clone(),
                    address: address.clone(),
                    price: None,
                    symbol: get_or_none(symbols, i),
                    network: get_or_none(networks, i),
                    timestamp: "0".to_string(),
                    serial: i,
                    request_status: None,
                },
            };

            if !result.has_price() {
                let status = result
                    .request_status
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "200".to_string());
                if self.throttler.throttle(key, &status).await {
                    self.alerts.save_log(
                        "priceResolver-batch_current",
                        &result.chain_id,
                        &result.address,
                        dates::alert_day(dates::now_unix()),
                        dates::now_unix(),
                    );
                }
            }
            output.push(result);
        }
        Ok(output)
    }

    /// One provider call over a set of pending ids; returns the keys now
    /// resolved (including aliased ids materialized from a canonical hit).
    async fn run_current_source(
        &self,
        source: Source,
        pending: Vec<String>,
        ctx: &BatchContext,
        results: &mut HashMap<String, PriceResult>,
        is_cache: bool,
    ) -> Vec<String> {
        if self.config.prohibited_current.contains(source.as_str()) {
            return Vec::new();
        }

        let mut b_chain_ids = Vec::new();
        let mut b_addresses = Vec::new();
        let mut b_symbols = Vec::new();
        let mut b_networks = Vec::new();

        for id in &pending {
            let Some(&index) = ctx.index_by_id.get(id) else {
                continue;
            };
            if self.throttler.is_throttled(id).await {
                results.insert(
                    id.clone(),
                    PriceResult {
                        chain_id: ctx.chain_ids[index].clone(),
                        address: ctx.addresses[index].clone(),
                        price: None,
                        symbol: get_or_none(&ctx.symbols, index),
                        network: get_or_none(&ctx.networks, index),
                        timestamp: "0".to_string(),
                        serial: index,
                        request_status: None,
                    },
                );
                self.alerts.save_log(
                    "priceResolver-batch_current",
                    &ctx.chain_ids[index],
                    &ctx.addresses[index],
                    dates::alert_day(dates::now_unix()),
                    dates::now_unix(),
                );
                continue;
            }
            let (chain_id, address) = ctx.upstream_pair(id, index);
            b_chain_ids.push(chain_id);
            b_addresses.push(address);
            b_symbols.push(get_or_default(&ctx.symbols, index));
            b_networks.push(get_or_default(&ctx.networks, index));
        }

        if b_addresses.is_empty() {
            return Vec::new();
        }

        let fetched = match source {
            Source::Coingecko => {
                self.coingecko
                    .batch_current(&b_addresses, &b_chain_ids, &b_symbols, &b_networks, is_cache)
                    .await
            }
            Source::Geckoterminal => {
                self.geckoterminal
                    .batch_current(&b_addresses, &b_chain_ids, &b_symbols, &b_networks, is_cache)
                    .await
            }
            Source::Defillama => {
                self.defillama
                    .batch_current(&b_addresses, &b_chain_ids, &b_symbols, &b_networks, is_cache)
                    .await
            }
            Source::CoinGeckoOnChain => {
                self.coingecko_onchain
                    .batch_current(&b_addresses, &b_chain_ids, &b_symbols, &b_networks, is_cache)
                    .await
            }
            Source::DodoexRoute => {
                self.dodoex_route
                    .batch_current(&b_addresses, &b_chain_ids, &b_symbols, &b_networks, is_cache)
                    .await
            }
        };

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(source = %source, error = %e, "Batch current price fetch failed");
                return Vec::new();
            }
        };

        let mut resolved = Vec::new();
        for result in fetched {
            let key = coin_id(&result.chain_id, &result.address);
            if !result.has_price() {
                // Keep the request status so the final throttle call sees
                // a 429 where one happened.
                if result.request_status.is_some() {
                    results.entry(key).or_insert(result);
                }
                continue;
            }
            resolved.push(key.clone());
            if let Some(aliased_ids) = ctx.alias_back.get(&key) {
                for aliased in aliased_ids {
                    let (chain_id, address) = split_coin_id(aliased);
                    let mut copy = result.clone();
                    copy.chain_id = chain_id;
                    copy.address = address;
                    results.insert(aliased.clone(), copy);
                    resolved.push(aliased.clone());
                }
            }
            results.insert(key, result);
        }
        resolved
    }

    /// Resolve a batch of historical prices. `dates_str` carries the
    /// caller's original date strings, echoed back in the results.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_batch_historical(
        &self,
        chain_ids: &[String],
        addresses: &[String],
        symbols: &[String],
        networks: &[String],
        unix_dates: &[i64],
        dates_str: &[String],
    ) -> Result<Vec<PriceResult>> {
        let lower_addresses: Vec<String> =
            addresses.iter().map(|a| a.to_lowercase()).collect();
        let ids: Vec<String> = (0..addresses.len())
            .map(|i| format!("{}_{}_{}", chain_ids[i], lower_addresses[i], unix_dates[i]))
            .collect();
        let coin_ids: Vec<String> = chain_ids
            .iter()
            .zip(&lower_addresses)
            .map(|(chain, addr)| format!("{}_{}", chain, addr))
            .collect();
        let mut index_by_id = HashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            index_by_id.insert(id.clone(), i);
        }

        let coins = self.coin_repo.get_by_ids(&coin_ids).await?;
        let mut coin_map: HashMap<String, Coin> = HashMap::with_capacity(coins.len());
        let (alias_of, alias_back) = alias_maps(&coins);
        for coin in coins {
            coin_map.insert(coin.id.clone(), coin);
        }

        // Preferred sets and the fallback sets (coingecko only answers for
        // known coins; the on-chain source is not part of the historical
        // pipeline).
        let mut preferred: [HashSet<String>; 3] = Default::default();
        let mut sets: [HashSet<String>; 3] = Default::default();
        for (i, id) in ids.iter().enumerate() {
            if let Some(coin) = coin_map.get(&coin_ids[i]) {
                let pinned = coin.price_source.as_deref().unwrap_or_default();
                let last = coin.last_price_source.as_deref().unwrap_or_default();
                match pinned {
                    "coingecko" => {
                        preferred[0].insert(id.clone());
                    }
                    "geckoterminal" => {
                        preferred[1].insert(id.clone());
                    }
                    _ => match last {
                        "coingecko" => {
                            preferred[0].insert(id.clone());
                        }
                        "geckoterminal" => {
                            preferred[1].insert(id.clone());
                        }
                        "defillama" => {
                            preferred[2].insert(id.clone());
                        }
                        _ => {}
                    },
                }
                sets[GECKO].insert(id.clone());
            }
            sets[TERMINAL].insert(id.clone());
            sets[LLAMA].insert(id.clone());
        }

        let mut results: HashMap<String, PriceResult> = HashMap::new();

        let hist_ctx = HistoricalContext {
            coin_ids: &coin_ids,
            index_by_id: &index_by_id,
            chain_ids,
            addresses: &lower_addresses,
            symbols,
            networks,
            unix_dates,
            alias_of: &alias_of,
            alias_back: &alias_back,
        };

        let preferred_plan = [
            (Source::Coingecko, 0usize),
            (Source::Geckoterminal, 1),
            (Source::Defillama, 2),
        ];
        for (source, idx) in preferred_plan {
            if preferred[idx].is_empty() {
                continue;
            }
            let pending: Vec<String> = preferred[idx].iter().cloned().collect();
            let resolved = self
                .run_historical_source(source, pending, &hist_ctx, &mut results)
                .await;
            for set in &mut sets {
                for key in &resolved {
                    set.remove(key);
                }
            }
        }

        let fallback_plan = [
            (Source::Coingecko, GECKO),
            (Source::Defillama, LLAMA),
            (Source::Geckoterminal, TERMINAL),
        ];
        for (source, idx) in fallback_plan {
            if sets[idx].is_empty() {
                continue;
            }
            let pending: Vec<String> = sets[idx].iter().cloned().collect();
            let resolved = self
                .run_historical_source(source, pending, &hist_ctx, &mut results)
                .await;
            for set in &mut sets {
                for key in &resolved {
                    set.remove(key);
                }
            }
        }

        let mut output = Vec::with_capacity(addresses.len());
        for (i, address) in addresses.iter().enumerate() {
            let key = &ids[i];
            let mut result = match results.get(key) {
                Some(found) => found.clone(),
                None => PriceResult::empty(
                    &chain_ids[i],
                    address,
                    get_or_none(symbols, i),
                    get_or_none(networks, i),
                ),
            };
            result.serial = i;
            result.timestamp = dates_str.get(i).cloned().unwrap_or_default();
            result.symbol = get_or_none(symbols, i);
            result.network = get_or_none(networks, i);
            result.address = address.clone();

            if !result.has_price() {
                let status = result
                    .request_status
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "200".to_string());
                let throttle_id = format!(
                    "{}_{}_{}",
                    chain_ids[i],
                    lower_addresses[i],
                    dates::day_date(unix_dates[i])
                );
                if self.throttler.throttle(&throttle_id, &status).await {
                    self.alerts.save_log(
                        "priceResolver-batch_historical",
                        &result.chain_id,
                        &result.address,
                        dates::alert_day(unix_dates[i]),
                        dates::now_unix(),
                    );
                }
            }
            output.push(result);
        }
        Ok(output)
    }

    async fn run_historical_source(
        &self,
        source: Source,
        pending: Vec<String>,
        ctx: &HistoricalContext<'_>,
        results: &mut HashMap<String, PriceResult>,
    ) -> Vec<String> {
        if self.config.prohibited_historical.contains(source.as_str()) {
            return Vec::new();
        }

        let mut b_chain_ids = Vec::new();
        let mut b_addresses = Vec::new();
        let mut b_symbols = Vec::new();
        let mut b_networks = Vec::new();
        let mut b_dates = Vec::new();

        for id in &pending {
            let Some(&index) = ctx.index_by_id.get(id) else {
                continue;
            };
            let throttle_id = format!(
                "{}_{}_{}",
                ctx.chain_ids[index],
                ctx.addresses[index],
                dates::day_date(ctx.unix_dates[index])
            );
            if self.throttler.is_throttled(&throttle_id).await {
                results.insert(
                    id.clone(),
                    PriceResult {
                        chain_id: ctx.chain_ids[index].clone(),
                        address: ctx.addresses[index].clone(),
                        price: None,
                        symbol: get_or_none(ctx.symbols, index),
                        network: get_or_none(ctx.networks, index),
                        timestamp: ctx.unix_dates[index].to_string(),
                        serial: index,
                        request_status: None,
                    },
                );
                self.alerts.save_log(
                    "priceResolver-batch_historical",
                    &ctx.chain_ids[index],
                    &ctx.addresses[index],
                    dates::alert_day(ctx.unix_dates[index]),
                    dates::now_unix(),
                );
                continue;
            }
            let coin_id_key = &ctx.coin_ids[index];
            match ctx.alias_of.get(coin_id_key) {
                Some(canonical) => {
                    let (chain_id, address) = split_coin_id(canonical);
                    b_chain_ids.push(chain_id);
                    b_addresses.push(address);
                }
                None => {
                    b_chain_ids.push(ctx.chain_ids[index].clone());
                    b_addresses.push(ctx.addresses[index].clone());
                }
            }
            b_symbols.push(get_or_default(ctx.symbols, index));
            b_networks.push(get_or_default(ctx.networks, index));
            b_dates.push(ctx.unix_dates[index]);
        }

        if b_addresses.is_empty() {
            return Vec::new();
        }

        let fetched = match source {
            Source::Coingecko => {
                self.coingecko
                    .batch_historical(&b_addresses, &b_chain_ids, &b_symbols, &b_networks, &b_dates)
                    .await
            }
            Source::Geckoterminal => {
                self.geckoterminal
                    .batch_historical(&b_addresses, &b_chain_ids, &b_symbols, &b_networks, &b_dates)
                    .await
            }
            Source::Defillama => {
                self.defillama
                    .batch_historical(&b_addresses, &b_chain_ids, &b_symbols, &b_networks, &b_dates)
                    .await
            }
            _ => return Vec::new(),
        };

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(source = %source, error = %e, "Batch historical price fetch failed");
                return Vec::new();
            }
        };

        let mut resolved = Vec::new();
        for result in fetched {
            let key = format!(
                "{}_{}_{}",
                result.chain_id,
                result.address.to_lowercase(),
                result.timestamp
            );
            if !result.has_price() {
                if result.request_status.is_some() {
                    results.entry(key).or_insert(result);
                }
                continue;
            }
            resolved.push(key.clone());
            let canonical = coin_id(&result.chain_id, &result.address);
            if let Some(aliased_ids) = ctx.alias_back.get(&canonical) {
                for aliased in aliased_ids {
                    let (chain_id, address) = split_coin_id(aliased);
                    let aliased_key = format!("{}_{}", aliased, result.timestamp);
                    let mut copy = result.clone();
                    copy.chain_id = chain_id;
                    copy.address = address;
                    results.insert(aliased_key.clone(), copy);
                    resolved.push(aliased_key);
                }
            }
            results.insert(key, result);
        }
        resolved
    }

    /// Single historical lookup: alias-resolve the coin first, then pinned
    /// source, last source, and the default order.
    pub async fn fetch_historical_single(
        &self,
        chain_id: &str,
        address: &str,
        symbol: &str,
        network: &str,
        unix_date: i64,
    ) -> Result<Option<String>> {
        let mut chain_id = chain_id.to_string();
        let mut address = address.to_lowercase();

        let coin = self
            .coin_repo
            .get_by_id(&format!("{}_{}", chain_id, address))
            .await?;
        if let Some(coin) = &coin {
            if !coin.chain_id.is_empty() && !coin.address.is_empty() {
                chain_id = coin.chain_id.clone();
                address = coin.address.clone();
            }
        }

        let day = dates::day_date(unix_date);
        let throttle_id = format!("{}_{}_{}", chain_id, address, day);
        if self.throttler.is_throttled(&throttle_id).await {
            self.alerts.save_log(
                "priceResolver-historical_single",
                &chain_id,
                &address,
                dates::alert_day(unix_date),
                dates::now_unix(),
            );
            return Ok(None);
        }

        let mut last_status = "200";
        let mut attempted: HashSet<&str> = HashSet::new();

        let mut plan: Vec<String> = Vec::new();
        if let Some(coin) = &coin {
            if let Some(pinned) = coin.price_source.clone().filter(|s| !s.is_empty()) {
                plan.push(pinned);
            }
            if let Some(last) = coin.last_price_source.clone().filter(|s| !s.is_empty()) {
                plan.push(last);
            }
        }
        plan.extend(
            ["coingecko", "defillama", "geckoterminal"]
                .iter()
                .map(|s| s.to_string()),
        );

        for source in plan {
            if self.config.prohibited_historical.contains(&source) {
                continue;
            }
            let Some(parsed) = Source::parse(&source) else {
                continue;
            };
            // The on-chain source is excluded from the historical pipeline.
            if matches!(parsed, Source::CoinGeckoOnChain | Source::DodoexRoute) {
                continue;
            }
            if !attempted.insert(parsed.as_str()) {
                continue;
            }

            let fetched = match parsed {
                Source::Coingecko => {
                    self.coingecko
                        .single_historical(unix_date, &chain_id, &address, symbol, network)
                        .await
                }
                Source::Geckoterminal => {
                    self.geckoterminal
                        .historical_single(&chain_id, &address, unix_date)
                        .await
                }
                Source::Defillama => {
                    self.defillama
                        .historical_single(&chain_id, &address, unix_date)
                        .await
                }
                _ => Ok(None),
            };

            match fetched {
                Ok(Some(price)) if !price.is_empty() => return Ok(Some(price)),
                Ok(_) => {}
                Err(e) => {
                    last_status = e.request_status();
                    debug!(source = %parsed, error = %e, "Historical price fetch failed");
                }
            }
        }

        if self.throttler.throttle(&throttle_id, last_status).await {
            self.alerts.save_log(
                "priceResolver-historical_single",
                &chain_id,
                &address,
                dates::alert_day(unix_date),
                dates::now_unix(),
            );
        }
        Ok(None)
    }
}

struct HistoricalContext<'a> {
    coin_ids: &'a [String],
    index_by_id: &'a HashMap<String, usize>,
    chain_ids: &'a [String],
    addresses: &'a [String],
    symbols: &'a [String],
    networks: &'a [String],
    unix_dates: &'a [i64],
    alias_of: &'a HashMap<String, String>,
    alias_back: &'a HashMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(id: &str, chain: &str, addr: &str) -> Coin {
        Coin {
            id: id.to_string(),
            chain_id: chain.to_string(),
            address: addr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_alias_maps_ignore_canonical_records() {
        let coins = vec![coin("1_0xa", "1", "0xa")];
        let (alias_of, alias_back) = alias_maps(&coins);
        assert!(alias_of.is_empty());
        assert!(alias_back.is_empty());
    }

    #[test]
    fn test_alias_maps_link_forwarded_records() {
        // Record id 56_0xb forwards to 1_0xa's data.
        let coins = vec![coin("56_0xb", "1", "0xa")];
        let (alias_of, alias_back) = alias_maps(&coins);
        assert_eq!(alias_of.get("56_0xb"), Some(&"1_0xa".to_string()));
        assert_eq!(alias_back.get("1_0xa").unwrap(), &vec!["56_0xb".to_string()]);
    }

    #[test]
    fn test_split_coin_id_keeps_address_underscores_off() {
        let (chain, addr) = split_coin_id("137_0xabc");
        assert_eq!(chain, "137");
        assert_eq!(addr, "0xabc");
    }
}
