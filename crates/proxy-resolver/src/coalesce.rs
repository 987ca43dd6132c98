//! Cross-instance request coalescing.
//!
//! Concurrent requests for the same coin collapse into one queue entry in
//! the shared cache; a single worker loop per instance drains the queue,
//! resolves prices in batches, and fans results out over pub/sub. Waiters
//! block on a single-shot channel until every fingerprint they registered
//! has been answered, then read the results back from the cache.

use crate::resolver::PriceResolver;
use crate::Result;
use futures::future::join_all;
use futures::StreamExt;
use proxy_core::dates;
use proxy_core::types::{get_or_none, PriceResult};
use proxy_redis::{keys, RedisConnection};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// TTL of `price_result:{chainId}_{address}` entries.
const RESULT_TTL_SECS: u64 = 300;

/// Sentinel stored when the pipeline definitively found no price.
const NO_PRICE: &str = "-1";

/// Startup grace before the background loops begin polling.
const STARTUP_DELAY: Duration = Duration::from_secs(3);

/// Fingerprint of one (chain, address, symbol, network) request tuple.
pub fn fingerprint(chain_id: &str, address: &str, symbol: &str, network: &str) -> String {
    let data = format!(
        "{}_{}_{}_{}",
        chain_id,
        address.to_lowercase(),
        symbol,
        network
    );
    format!("{:x}", md5::compute(data.as_bytes()))
}

/// Unique id for one waiting caller.
fn request_id(parts: &[&str]) -> String {
    let data = format!("{}_{}", parts.join("_"), Uuid::new_v4());
    format!("{:x}", md5::compute(data.as_bytes()))
}

/// Outcome of probing the shared result cache.
enum ResultProbe {
    /// A price is cached.
    Price(String),
    /// The pipeline already concluded there is no price.
    NoPrice,
    /// Nothing cached; the request must go through the queue.
    Absent,
}

/// The three per-process maps live in one structure behind one mutex;
/// notification and registration never interleave partially.
#[derive(Default)]
struct CoalesceState {
    /// fingerprint -> request ids waiting on it
    waiters: HashMap<String, Vec<String>>,
    /// request id -> completion channel (single-shot)
    channels: HashMap<String, oneshot::Sender<()>>,
    /// request id -> fingerprints still outstanding
    outstanding: HashMap<String, HashSet<String>>,
}

pub struct CoalescingEngine {
    redis: RedisConnection,
    resolver: PriceResolver,
    state: Mutex<CoalesceState>,
}

impl CoalescingEngine {
    pub fn new(redis: RedisConnection, resolver: PriceResolver) -> Arc<Self> {
        Arc::new(Self {
            redis,
            resolver,
            state: Mutex::new(CoalesceState::default()),
        })
    }

    /// Spawn the worker and subscriber loops. Call once per process.
    pub fn start(self: &Arc<Self>) {
        let worker = self.clone();
        tokio::spawn(async move { worker.worker_loop().await });
        let subscriber = self.clone();
        tokio::spawn(async move { subscriber.subscriber_loop().await });
    }

    fn register(&self, req_id: &str, fingerprints: &[String], sender: oneshot::Sender<()>) {
        let mut state = self.state.lock().expect("coalesce state poisoned");
        for fp in fingerprints {
            state
                .waiters
                .entry(fp.clone())
                .or_default()
                .push(req_id.to_string());
        }
        state
            .outstanding
            .insert(req_id.to_string(), fingerprints.iter().cloned().collect());
        state.channels.insert(req_id.to_string(), sender);
    }

    fn unregister(&self, req_id: &str) {
        let mut state = self.state.lock().expect("coalesce state poisoned");
        state.channels.remove(req_id);
        state.outstanding.remove(req_id);
    }

    /// A result for `fingerprint` arrived: drop it from every waiter's
    /// outstanding set and complete the waiters that have nothing left.
    fn notify(&self, fp: &str) {
        let mut state = self.state.lock().expect("coalesce state poisoned");
        let Some(request_ids) = state.waiters.remove(fp) else {
            return;
        };
        for req_id in request_ids {
            let done = match state.outstanding.get_mut(&req_id) {
                Some(pending) => {
                    pending.remove(fp);
                    pending.is_empty()
                }
                None => false,
            };
            if done {
                if let Some(sender) = state.channels.remove(&req_id) {
                    // Receiver may have timed out already; that's fine.
                    let _ = sender.send(());
                }
            }
        }
    }

    async fn probe_result(&self, chain_id: &str, address: &str) -> Result<ResultProbe> {
        let key = keys::price_result_key(chain_id, address);
        match self.redis.get_string(&key).await? {
            Some(value) if value == NO_PRICE => Ok(ResultProbe::NoPrice),
            Some(value) if !value.is_empty() => Ok(ResultProbe::Price(value)),
            _ => Ok(ResultProbe::Absent),
        }
    }

    /// Coalesced single current price.
    pub async fn get_single(
        &self,
        chain_id: &str,
        address: &str,
        symbol: &str,
        network: &str,
        exclude_route: bool,
    ) -> Result<Option<String>> {
        let address = address.to_lowercase();

        match self.probe_result(chain_id, &address).await? {
            ResultProbe::Price(price) => return Ok(Some(price)),
            ResultProbe::NoPrice => return Ok(None),
            ResultProbe::Absent => {}
        }

        let fp = fingerprint(chain_id, &address, symbol, network);
        let req_id = request_id(&[chain_id, address.as_str(), symbol, network]);
        let (sender, receiver) = oneshot::channel();
        self.register(&req_id, std::slice::from_ref(&fp), sender);

        let record = format!("{}|{}|{}|{}|{}", fp, chain_id, address, symbol, network);
        if let Err(e) = self
            .redis
            .enqueue_unique_request(
                keys::UNIQUE_PRICE_REQUESTS,
                keys::PRICE_REQUESTS_QUEUE,
                &fp,
                &record,
            )
            .await
        {
            self.unregister(&req_id);
            return Err(e.into());
        }

        let timeout = Duration::from_secs(self.resolver.config().process_timeout_secs);
        let completed = tokio::time::timeout(timeout, receiver).await.is_ok();
        self.unregister(&req_id);

        if completed {
            match self.probe_result(chain_id, &address).await? {
                ResultProbe::Price(price) => return Ok(Some(price)),
                ResultProbe::NoPrice | ResultProbe::Absent => {
                    if !exclude_route {
                        // The direct path appends the route source.
                        return self
                            .direct_single(chain_id, &address, symbol, network, exclude_route)
                            .await;
                    }
                    return Ok(None);
                }
            }
        }

        warn!(chain_id = %chain_id, address = %address, "Coalesced price wait timed out");
        self.direct_single(chain_id, &address, symbol, network, exclude_route)
            .await
    }

    async fn direct_single(
        &self,
        chain_id: &str,
        address: &str,
        symbol: &str,
        network: &str,
        exclude_route: bool,
    ) -> Result<Option<String>> {
        let mut results = self
            .resolver
            .fetch_batch_current(
                &[chain_id.to_string()],
                &[address.to_string()],
                &[symbol.to_string()],
                &[network.to_string()],
                true,
                exclude_route,
            )
            .await?;
        Ok(results.pop().and_then(|r| r.price))
    }

    /// Coalesced batch of current prices.
    pub async fn get_batch(
        &self,
        chain_ids: &[String],
        addresses: &[String],
        symbols: &[String],
        networks: &[String],
        exclude_route: bool,
    ) -> Result<Vec<PriceResult>> {
        let addresses: Vec<String> = addresses.iter().map(|a| a.to_lowercase()).collect();

        // Pre-check the shared result cache for every input.
        let mut known: HashMap<usize, Option<String>> = HashMap::new();
        let mut fingerprints = vec![String::new(); chain_ids.len()];
        let mut records = vec![String::new(); chain_ids.len()];
        for i in 0..chain_ids.len() {
            match self.probe_result(&chain_ids[i], &addresses[i]).await? {
                ResultProbe::Price(price) => {
                    known.insert(i, Some(price));
                }
                ResultProbe::NoPrice => {
                    known.insert(i, None);
                }
                ResultProbe::Absent => {
                    let symbol = symbols.get(i).cloned().unwrap_or_default();
                    let network = networks.get(i).cloned().unwrap_or_default();
                    let fp = fingerprint(&chain_ids[i], &addresses[i], &symbol, &network);
                    records[i] = format!(
                        "{}|{}|{}|{}|{}",
                        fp, chain_ids[i], addresses[i], symbol, network
                    );
                    fingerprints[i] = fp;
                }
            }
        }

        let pending: Vec<String> = fingerprints
            .iter()
            .filter(|fp| !fp.is_empty())
            .cloned()
            .collect();

        if pending.is_empty() {
            let results = self
                .collect_batch_results(chain_ids, &addresses, symbols, networks, &known)
                .await?;
            return self
                .maybe_retry_with_route(results, chain_ids, &addresses, symbols, networks, exclude_route)
                .await;
        }

        let joined_chains = chain_ids.join("_");
        let joined_addresses = addresses.join("_");
        let req_id = request_id(&[joined_chains.as_str(), joined_addresses.as_str()]);
        let (sender, receiver) = oneshot::channel();
        self.register(&req_id, &pending, sender);

        let enqueued = self
            .redis
            .enqueue_unique_requests(
                keys::UNIQUE_PRICE_REQUESTS,
                keys::PRICE_REQUESTS_QUEUE,
                &fingerprints,
                &records,
            )
            .await;
        match enqueued {
            Ok(count) if count > 0 => {
                debug!(count, "New unique price requests enqueued");
            }
            Ok(_) => {}
            Err(e) => {
                self.unregister(&req_id);
                return Err(e.into());
            }
        }

        let timeout = Duration::from_secs(self.resolver.config().process_timeout_secs);
        let completed = tokio::time::timeout(timeout, receiver).await.is_ok();
        self.unregister(&req_id);

        if !completed {
            warn!("Coalesced batch wait timed out, falling back to direct path");
            return self
                .resolver
                .fetch_batch_current(chain_ids, &addresses, symbols, networks, true, exclude_route)
                .await;
        }

        let results = self
            .collect_batch_results(chain_ids, &addresses, symbols, networks, &known)
            .await?;
        self.maybe_retry_with_route(results, chain_ids, &addresses, symbols, networks, exclude_route)
            .await
    }

    /// Assemble batch output from the pre-check map plus the result cache.
    async fn collect_batch_results(
        &self,
        chain_ids: &[String],
        addresses: &[String],
        symbols: &[String],
        networks: &[String],
        known: &HashMap<usize, Option<String>>,
    ) -> Result<Vec<PriceResult>> {
        let now = dates::now_unix().to_string();
        let mut results = Vec::with_capacity(chain_ids.len());
        for i in 0..chain_ids.len() {
            let price = match known.get(&i) {
                Some(price) => price.clone(),
                None => match self.probe_result(&chain_ids[i], &addresses[i]).await? {
                    ResultProbe::Price(price) => Some(price),
                    ResultProbe::NoPrice | ResultProbe::Absent => None,
                },
            };
            let timestamp = if price.is_some() { now.clone() } else { "0".to_string() };
            results.push(PriceResult {
                chain_id: chain_ids[i].clone(),
                address: addresses[i].clone(),
                price,
                symbol: get_or_none(symbols, i),
                network: get_or_none(networks, i),
                timestamp,
                serial: i,
                request_status: None,
            });
        }
        Ok(results)
    }

    /// With the route source allowed, null prices trigger one direct retry
    /// (the direct path appends the route source).
    async fn maybe_retry_with_route(
        &self,
        results: Vec<PriceResult>,
        chain_ids: &[String],
        addresses: &[String],
        symbols: &[String],
        networks: &[String],
        exclude_route: bool,
    ) -> Result<Vec<PriceResult>> {
        if exclude_route || results.iter().all(|r| r.has_price()) {
            return Ok(results);
        }
        self.resolver
            .fetch_batch_current(chain_ids, addresses, symbols, networks, true, exclude_route)
            .await
    }

    /// Single worker per instance: drain the shared queue atomically, fan
    /// batches out to the resolver's direct path, cache each result and
    /// publish its arrival.
    async fn worker_loop(self: Arc<Self>) {
        sleep(STARTUP_DELAY).await;
        let interval = Duration::from_millis(self.resolver.config().process_time_ms);
        let fetch_size = self.resolver.config().fetch_size;
        let batch_size = self.resolver.config().batch_size;

        loop {
            sleep(interval).await;

            let drained = match self
                .redis
                .drain_requests(keys::PRICE_REQUESTS_QUEUE, keys::UNIQUE_PRICE_REQUESTS, fetch_size)
                .await
            {
                Ok(drained) => drained,
                Err(e) => {
                    error!(error = %e, "Failed to drain price request queue");
                    continue;
                }
            };
            if drained.is_empty() {
                continue;
            }

            let handles: Vec<_> = drained
                .chunks(batch_size)
                .map(|chunk| {
                    let this = self.clone();
                    let batch: Vec<String> = chunk.to_vec();
                    tokio::spawn(async move { this.process_batch(batch).await })
                })
                .collect();
            join_all(handles).await;
        }
    }

    async fn process_batch(&self, batch: Vec<String>) {
        let mut fps = Vec::with_capacity(batch.len());
        let mut chain_ids = Vec::with_capacity(batch.len());
        let mut addresses = Vec::with_capacity(batch.len());
        let mut symbols = Vec::with_capacity(batch.len());
        let mut networks = Vec::with_capacity(batch.len());

        for record in &batch {
            let parts: Vec<&str> = record.split('|').collect();
            if parts.len() != 5 {
                warn!(record = %record, "Invalid queued request format");
                continue;
            }
            fps.push(parts[0].to_string());
            chain_ids.push(parts[1].to_string());
            addresses.push(parts[2].to_string());
            symbols.push(parts[3].to_string());
            networks.push(parts[4].to_string());
        }
        if fps.is_empty() {
            return;
        }

        let results = match self
            .resolver
            .fetch_batch_current(&chain_ids, &addresses, &symbols, &networks, true, true)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Failed to resolve coalesced batch");
                return;
            }
        };

        let mut conn = self.redis.get_connection();
        for (result, fp) in results.iter().zip(&fps) {
            let result_key = keys::price_result_key(&result.chain_id, &result.address);
            let value = result.price.clone().unwrap_or_else(|| NO_PRICE.to_string());

            // SET must land before the PUBLISH so a woken subscriber can
            // re-read the key and see the value.
            let set: std::result::Result<(), redis::RedisError> = redis::cmd("SET")
                .arg(&result_key)
                .arg(&value)
                .arg("EX")
                .arg(RESULT_TTL_SECS)
                .query_async(&mut conn)
                .await;
            if let Err(e) = set {
                error!(error = %e, key = %result_key, "Failed to cache price result");
                continue;
            }

            let message = format!("{}|{}", result_key, fp);
            let publish: std::result::Result<(), redis::RedisError> = redis::cmd("PUBLISH")
                .arg(keys::PRICE_RESULTS_CHANNEL)
                .arg(&message)
                .query_async(&mut conn)
                .await;
            if let Err(e) = publish {
                error!(error = %e, "Failed to publish price result");
            }
        }
    }

    /// One subscription per process; reconnects when the stream drops.
    async fn subscriber_loop(self: Arc<Self>) {
        sleep(STARTUP_DELAY).await;
        loop {
            let mut pubsub = match self.redis.pubsub().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    error!(error = %e, "Failed to open pub/sub connection");
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            if let Err(e) = pubsub.subscribe(keys::PRICE_RESULTS_CHANNEL).await {
                error!(error = %e, "Failed to subscribe to results channel");
                sleep(Duration::from_secs(1)).await;
                continue;
            }

            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "Malformed pub/sub payload");
                        continue;
                    }
                };
                let mut parts = payload.splitn(2, '|');
                let (Some(_result_key), Some(fp)) = (parts.next(), parts.next()) else {
                    continue;
                };
                self.notify(fp);
            }
            warn!("Results subscription ended, reconnecting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_case_insensitive() {
        let a = fingerprint("1", "0xABC", "WETH", "ethereum");
        let b = fingerprint("1", "0xabc", "WETH", "ethereum");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, fingerprint("1", "0xabc", "WETH", "bsc"));
    }

    #[test]
    fn test_request_id_is_unique_per_call() {
        let a = request_id(&["1", "0xabc"]);
        let b = request_id(&["1", "0xabc"]);
        assert_ne!(a, b);
    }
}
