use crate::models::Coin;
use crate::pool::DatabasePool;
use crate::repositories::{dedup_by_key, MAX_RETRIES, RETRY_DELAY};
use crate::{is_deadlock_message, DatabaseError, Result};
use proxy_redis::{keys, RedisConnection};
use sqlx::Postgres;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Coin record cache TTL.
const COIN_CACHE_TTL: Duration = Duration::from_secs(72 * 60 * 60);

/// Queue length that triggers an inline drain.
const QUEUE_RUN_SIZE: i64 = 1000;

/// Upsert batch size (one transaction per batch).
const UPSERT_BATCH_SIZE: usize = 1000;

/// Cache-write batch size and retry budget.
const CACHE_BATCH_SIZE: usize = 1000;
const CACHE_MAX_RETRIES: usize = 3;

/// `return_coins_id` chains are acyclic by invariant; the walk still carries
/// a depth cap in case a bad row slips in.
const ALIAS_DEPTH_CAP: usize = 8;

const UPSERT_SQL: &str = r#"
INSERT INTO coins (id, address, chain_id, symbol, name, coingecko_coin_id,
                   coingecko_platforms, geckoterminal_network, decimals, total_supply,
                   price_source, last_price_source, return_coins_id)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
ON CONFLICT (id) DO UPDATE SET
    address = COALESCE(NULLIF(EXCLUDED.address, ''), coins.address),
    chain_id = COALESCE(NULLIF(EXCLUDED.chain_id, ''), coins.chain_id),
    symbol = COALESCE(NULLIF(EXCLUDED.symbol, ''), coins.symbol),
    name = COALESCE(NULLIF(EXCLUDED.name, ''), coins.name),
    coingecko_coin_id = COALESCE(NULLIF(EXCLUDED.coingecko_coin_id, ''), coins.coingecko_coin_id),
    coingecko_platforms = COALESCE(EXCLUDED.coingecko_platforms, coins.coingecko_platforms),
    geckoterminal_network = COALESCE(NULLIF(EXCLUDED.geckoterminal_network, ''), coins.geckoterminal_network),
    decimals = COALESCE(EXCLUDED.decimals, coins.decimals),
    total_supply = COALESCE(NULLIF(EXCLUDED.total_supply, ''), coins.total_supply),
    price_source = COALESCE(NULLIF(EXCLUDED.price_source, ''), coins.price_source),
    last_price_source = COALESCE(NULLIF(EXCLUDED.last_price_source, ''), coins.last_price_source),
    return_coins_id = COALESCE(NULLIF(EXCLUDED.return_coins_id, ''), coins.return_coins_id),
    updated_at = NOW()
"#;

const SELECT_COLUMNS: &str = "id, address, chain_id, symbol, name, coingecko_coin_id, \
     coingecko_platforms, geckoterminal_network, decimals, total_supply, \
     price_source, last_price_source, return_coins_id";

/// Read-through cache plus write-behind queue for coin metadata.
#[derive(Clone)]
pub struct CoinRepository {
    db: DatabasePool,
    redis: RedisConnection,
}

impl CoinRepository {
    pub fn new(db: DatabasePool, redis: RedisConnection) -> Self {
        Self { db, redis }
    }

    /// Load one record from cache, falling back to the store and caching the
    /// row on a hit. No alias resolution.
    async fn load_coin(&self, id: &str) -> Result<Option<Coin>> {
        if let Some(coin) = self.redis.get_json::<Coin>(&keys::coin_key(id)).await? {
            return Ok(Some(coin));
        }
        let coin = self.fetch_from_db(id).await?;
        if let Some(coin) = &coin {
            self.redis
                .set_json(&keys::coin_key(id), coin, COIN_CACHE_TTL)
                .await
                .ok();
        }
        Ok(coin)
    }

    async fn fetch_from_db(&self, id: &str) -> Result<Option<Coin>> {
        let sql = format!(
            "SELECT {} FROM coins WHERE id = $1 AND deleted_at IS NULL",
            SELECT_COLUMNS
        );
        let coin = sqlx::query_as::<Postgres, Coin>(&sql)
            .bind(id)
            .fetch_optional(self.db.inner())
            .await?;
        Ok(coin)
    }

    /// Look up one coin, following its alias chain. The resolved copy keeps
    /// the original lookup id and is written back to cache so later reads
    /// are O(1).
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Coin>> {
        let Some(mut coin) = self.load_coin(id).await? else {
            return Ok(None);
        };

        let mut depth = 0;
        while let Some(target) = coin.alias_target().map(str::to_string) {
            if depth >= ALIAS_DEPTH_CAP {
                warn!(coin_id = %id, "Alias chain exceeded depth cap");
                break;
            }
            depth += 1;
            match self.load_coin(&target).await? {
                Some(next) if !next.chain_id.is_empty() && !next.address.is_empty() => coin = next,
                _ => return Ok(None),
            }
        }

        if depth > 0 {
            coin.id = id.to_string();
            self.redis
                .set_json(&keys::coin_key(id), &coin, COIN_CACHE_TTL)
                .await
                .ok();
        }
        Ok(Some(coin))
    }

    /// Batched cache lookup. Missing ids are absent from the result, not
    /// errored; alias entries are resolved and re-cached under the lookup id.
    pub async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Coin>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cache_keys: Vec<String> = ids.iter().map(|id| keys::coin_key(id)).collect();
        let cached = self.redis.get_many(&cache_keys).await?;

        let mut coins = Vec::with_capacity(cached.len());
        for id in ids {
            let Some(raw) = cached.get(&keys::coin_key(id)) else {
                continue;
            };
            let Ok(coin) = serde_json::from_str::<Coin>(raw) else {
                continue;
            };
            if let Some(target) = coin.alias_target().map(str::to_string) {
                if let Some(mut resolved) = self.get_by_id(&target).await? {
                    resolved.id = coin.id.clone();
                    self.redis
                        .set_json(&keys::coin_key(&coin.id), &resolved, COIN_CACHE_TTL)
                        .await
                        .ok();
                    coins.push(resolved);
                }
            } else {
                coins.push(coin);
            }
        }
        Ok(coins)
    }

    pub async fn check_coin_exists(&self, id: &str) -> Result<bool> {
        Ok(self
            .get_by_id(id)
            .await?
            .map(|c| !c.id.is_empty())
            .unwrap_or(false))
    }

    /// Batched INSERT … ON CONFLICT upsert; every non-empty column wins over
    /// the stored value, `updated_at` becomes NOW(). One transaction per
    /// 1000-row batch, cache refreshed per committed batch.
    pub async fn upsert_coins(&self, coins: &[Coin]) -> Result<()> {
        if coins.is_empty() {
            return Ok(());
        }
        reject_alias_cycles(coins)?;

        let started = Instant::now();
        for batch in coins.chunks(UPSERT_BATCH_SIZE) {
            let mut tx = self.db.begin().await?;
            for coin in batch {
                if coin.id.is_empty() {
                    continue;
                }
                sqlx::query(UPSERT_SQL)
                    .bind(&coin.id)
                    .bind(&coin.address)
                    .bind(&coin.chain_id)
                    .bind(&coin.symbol)
                    .bind(&coin.name)
                    .bind(&coin.coingecko_coin_id)
                    .bind(&coin.coingecko_platforms)
                    .bind(&coin.geckoterminal_network)
                    .bind(coin.decimals)
                    .bind(&coin.total_supply)
                    .bind(&coin.price_source)
                    .bind(&coin.last_price_source)
                    .bind(&coin.return_coins_id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;

            let ids: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();
            if let Err(e) = self.refresh_coin_list_cache(&ids).await {
                error!(error = %e, "Failed to refresh coin cache after upsert");
            }
        }

        info!(
            count = coins.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Upserted coins"
        );
        Ok(())
    }

    /// Re-read the given ids from the store and rewrite their cache entries.
    pub async fn refresh_coin_list_cache(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "SELECT {} FROM coins WHERE id = ANY($1) AND deleted_at IS NULL",
            SELECT_COLUMNS
        );
        let coins = sqlx::query_as::<Postgres, Coin>(&sql)
            .bind(ids)
            .fetch_all(self.db.inner())
            .await?;
        self.cache_coin_batch(&coins).await;
        Ok(())
    }

    /// Rebuild the cache from every live row. Rows carrying a coingecko id
    /// get their pinned source reset to coingecko first.
    pub async fn refresh_all_coins_cache(&self) -> Result<()> {
        sqlx::query("UPDATE coins SET price_source = 'coingecko' WHERE coingecko_coin_id IS NOT NULL")
            .execute(self.db.inner())
            .await?;

        let sql = format!("SELECT {} FROM coins WHERE deleted_at IS NULL", SELECT_COLUMNS);
        let coins = sqlx::query_as::<Postgres, Coin>(&sql)
            .fetch_all(self.db.inner())
            .await?;
        info!(count = coins.len(), "Rebuilding all-coins cache");
        self.cache_coin_batch(&coins).await;
        Ok(())
    }

    /// Write a batch of records to cache. Alias entries are rewritten as the
    /// resolved target with the original id before caching.
    async fn cache_coin_batch(&self, coins: &[Coin]) {
        let mut alias_coins = Vec::new();
        let mut conn = self.redis.get_connection();

        for batch in coins.chunks(CACHE_BATCH_SIZE) {
            for attempt in 1..=CACHE_MAX_RETRIES {
                let mut pipe = redis::pipe();
                for coin in batch {
                    if coin.chain_id.is_empty() || coin.address.is_empty() {
                        continue;
                    }
                    if attempt == 1 && coin.alias_target().is_some() {
                        alias_coins.push(coin.clone());
                    }
                    match serde_json::to_string(coin) {
                        Ok(data) => {
                            pipe.cmd("SET")
                                .arg(keys::coin_key(&coin.id))
                                .arg(data)
                                .arg("EX")
                                .arg(COIN_CACHE_TTL.as_secs())
                                .ignore();
                        }
                        Err(e) => {
                            error!(error = %e, coin_id = %coin.id, "Failed to serialize coin");
                        }
                    }
                }
                match pipe.query_async::<()>(&mut conn).await {
                    Ok(()) => break,
                    Err(e) => error!(error = %e, attempt, "Coin cache pipeline failed"),
                }
            }
        }

        for coin in alias_coins {
            let Some(target) = coin.alias_target().map(str::to_string) else {
                continue;
            };
            match self.get_by_id(&target).await {
                Ok(Some(mut resolved)) => {
                    resolved.id = coin.id.clone();
                    if let Err(e) = self
                        .redis
                        .set_json(&keys::coin_key(&coin.id), &resolved, COIN_CACHE_TTL)
                        .await
                    {
                        error!(error = %e, coin_id = %coin.id, "Failed to cache alias copy");
                    }
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, target = %target, "Failed to resolve alias target"),
            }
        }
    }

    /// Push coins into the shared write-behind queue unless already pending.
    /// Crossing the threshold triggers an inline drain.
    pub async fn add_to_queue(&self, coins: Vec<Coin>) -> Result<()> {
        let valid: Vec<&Coin> = coins
            .iter()
            .filter(|c| !c.id.is_empty() && !c.chain_id.is_empty() && !c.address.is_empty())
            .collect();
        if valid.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.get_connection();
        let mut pipe = redis::pipe();
        for coin in &valid {
            pipe.cmd("SADD")
                .arg(keys::coins_set_key(&coin.id))
                .arg(&coin.id);
        }
        let added: Vec<i64> = pipe.query_async(&mut conn).await.map_err(proxy_redis::RedisError::from)?;

        let mut push = redis::pipe();
        let mut any = false;
        for (coin, was_new) in valid.iter().zip(added) {
            if was_new != 1 {
                debug!(coin_id = %coin.id, "Coin already queued");
                continue;
            }
            let data = serde_json::to_string(coin)?;
            push.cmd("RPUSH").arg(keys::COINS_QUEUE).arg(data).ignore();
            any = true;
        }
        if any {
            push.query_async::<()>(&mut conn)
                .await
                .map_err(proxy_redis::RedisError::from)?;
        }

        let queue_len = self.redis.list_len(keys::COINS_QUEUE).await?;
        if queue_len >= QUEUE_RUN_SIZE {
            self.process_queue().await?;
        }
        Ok(())
    }

    /// Drain the write-behind queue under the shared lock: dedup by id,
    /// upsert with deadlock retry, then clear the queue and companion set.
    pub async fn process_queue(&self) -> Result<()> {
        if !self.redis.try_queue_lock(keys::LOCK_COINS_QUEUE).await {
            warn!("Could not acquire coins queue lock");
            return Ok(());
        }
        let result = self.drain_queue().await;
        self.redis.unlock(keys::LOCK_COINS_QUEUE).await;
        result
    }

    async fn drain_queue(&self) -> Result<()> {
        let raw = self.redis.list_range_all(keys::COINS_QUEUE).await?;
        if raw.is_empty() {
            return Ok(());
        }

        let mut coins = Vec::with_capacity(raw.len());
        for item in &raw {
            match serde_json::from_str::<Coin>(item) {
                Ok(coin) => coins.push(coin),
                Err(e) => warn!(error = %e, "Dropping malformed queued coin"),
            }
        }
        let coins = dedup_by_key(coins, |c| c.id.clone());
        debug!(count = coins.len(), "Draining coin queue");

        let result = self.upsert_with_retry(&coins).await;

        // The queue and companion set are cleared even when the upsert gave
        // up; the drain is restartable and the data re-enqueues on next use.
        self.redis.delete(keys::COINS_QUEUE).await.ok();
        self.redis
            .delete_keys_by_prefix(keys::COINS_SET_PREFIX)
            .await
            .ok();
        result
    }

    async fn upsert_with_retry(&self, coins: &[Coin]) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=MAX_RETRIES {
            match self.upsert_coins(coins).await {
                Ok(()) => return Ok(()),
                Err(DatabaseError::Query(msg)) if is_deadlock_message(&msg) => {
                    error!(attempt, max = MAX_RETRIES, "Deadlock detected, retrying");
                    last_err = Some(DatabaseError::Query(msg));
                    sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| DatabaseError::Query("upsert retries exhausted".into())))
    }

    /// Soft-delete a coin and drop its cache entry.
    pub async fn delete_coin(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE coins SET deleted_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.db.inner())
            .await?;
        self.redis.delete(&keys::coin_key(id)).await?;
        Ok(())
    }
}

/// Reject coins whose `return_coins_id` chain loops back on itself within
/// the batch (the store never checks, so bad rows must not get in).
fn reject_alias_cycles(coins: &[Coin]) -> Result<()> {
    let by_id: HashMap<&str, &Coin> = coins.iter().map(|c| (c.id.as_str(), c)).collect();
    for coin in coins {
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(coin.id.as_str());
        let mut current = coin;
        for _ in 0..ALIAS_DEPTH_CAP {
            let Some(target) = current.alias_target() else {
                break;
            };
            if !seen.insert(target) {
                return Err(DatabaseError::AliasCycle(coin.id.clone()));
            }
            match by_id.get(target) {
                Some(next) => current = next,
                None => break,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(id: &str, alias: Option<&str>) -> Coin {
        Coin {
            id: id.to_string(),
            address: id.split('_').nth(1).unwrap_or_default().to_string(),
            chain_id: id.split('_').next().unwrap_or_default().to_string(),
            return_coins_id: alias.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_reject_alias_cycles_accepts_chain() {
        let coins = vec![
            coin("1_0xa", Some("1_0xb")),
            coin("1_0xb", Some("1_0xc")),
            coin("1_0xc", None),
        ];
        assert!(reject_alias_cycles(&coins).is_ok());
    }

    #[test]
    fn test_reject_alias_cycles_detects_loop() {
        let coins = vec![coin("1_0xa", Some("1_0xb")), coin("1_0xb", Some("1_0xa"))];
        assert!(matches!(
            reject_alias_cycles(&coins),
            Err(DatabaseError::AliasCycle(_))
        ));
    }

    #[test]
    fn test_reject_alias_cycles_ignores_external_targets() {
        // Target outside the batch: nothing to walk, accepted.
        let coins = vec![coin("1_0xa", Some("56_0xzz"))];
        assert!(reject_alias_cycles(&coins).is_ok());
    }
}
