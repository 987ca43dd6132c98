use crate::models::{Coin, HistoricalPrice};
use crate::pool::DatabasePool;
use crate::repositories::{dedup_by_key, CoinRepository, MAX_RETRIES, RETRY_DELAY};
use crate::{is_deadlock_message, DatabaseError, Result};
use proxy_core::dates;
use proxy_redis::{keys, RedisConnection};
use redis::AsyncCommands;
use sqlx::Postgres;
use std::collections::HashMap;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Pending-list length that triggers an inline drain.
const QUEUE_RUN_SIZE: i64 = 1000;

/// Commit batch size (one transaction per batch).
const COMMIT_BATCH_SIZE: usize = 1000;

const UPSERT_SQL: &str = r#"
INSERT INTO coin_historical_prices (coin_id, date, day_date, price, source)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (coin_id, day_date) DO UPDATE SET
    price = EXCLUDED.price,
    source = EXCLUDED.source,
    updated_at = NOW()
"#;

/// Read-through cache plus write-behind queue for `(coin, day) → price`.
#[derive(Clone)]
pub struct HistoricalPriceRepository {
    db: DatabasePool,
    redis: RedisConnection,
    coin_repo: CoinRepository,
}

impl HistoricalPriceRepository {
    pub fn new(db: DatabasePool, redis: RedisConnection, coin_repo: CoinRepository) -> Self {
        Self {
            db,
            redis,
            coin_repo,
        }
    }

    /// Batched read keyed `{coinId}_{DD-MM-YYYY}`. Cache first; rows for past
    /// days fall through to the store and are cached on hit. Today is never
    /// served from the store; only cache or a live fetch can answer it.
    pub async fn get_prices(
        &self,
        coin_ids: &[String],
        unix_dates: &[i64],
    ) -> Result<HashMap<String, String>> {
        let today = dates::today_day_date();
        let day_dates: Vec<String> = unix_dates.iter().map(|d| dates::day_date(*d)).collect();

        let cache_keys: Vec<String> = coin_ids
            .iter()
            .zip(&day_dates)
            .map(|(id, day)| keys::historical_price_key(id, day))
            .collect();
        let cached = self.redis.get_many(&cache_keys).await?;

        let mut prices = HashMap::new();
        let mut missing: Vec<(String, String)> = Vec::new();
        for ((coin_id, day), cache_key) in coin_ids.iter().zip(&day_dates).zip(&cache_keys) {
            if let Some(price) = cached.get(cache_key) {
                prices.insert(format!("{}_{}", coin_id, day), price.clone());
            } else if *day != today {
                missing.push((coin_id.clone(), day.clone()));
            }
        }

        for (coin_id, day) in missing {
            let row = sqlx::query_as::<Postgres, HistoricalPrice>(
                "SELECT coin_id, date, day_date, price, source FROM coin_historical_prices \
                 WHERE coin_id = $1 AND day_date = $2 AND deleted_at IS NULL",
            )
            .bind(&coin_id)
            .bind(&day)
            .fetch_optional(self.db.inner())
            .await;

            match row {
                Ok(Some(price)) => {
                    self.redis
                        .set_historical_price(&price.coin_id, &price.day_date, &price.price)
                        .await
                        .ok();
                    prices.insert(price.queue_key(), price.price);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, coin_id = %coin_id, day = %day, "Historical price query failed");
                }
            }
        }
        Ok(prices)
    }

    /// Record prices: dedup by `(coin, day)`, refresh the cache entry, and
    /// either replace the already-pending queue record for the same key or
    /// append a new one. Crossing the threshold drains inline.
    pub async fn save_prices(&self, prices: Vec<HistoricalPrice>) -> Result<()> {
        if prices.is_empty() {
            return Ok(());
        }
        let unique = dedup_by_key(prices, |p| p.queue_key());

        let mut conn = self.redis.get_connection();
        for price in &unique {
            self.redis
                .set_historical_price(&price.coin_id, &price.day_date, &price.price)
                .await
                .ok();

            let set_key = keys::historical_set_key(&price.coin_id, &price.day_date);
            let added: i64 = conn
                .sadd(&set_key, &price.coin_id)
                .await
                .map_err(proxy_redis::RedisError::from)?;
            let data = serde_json::to_string(price)?;

            if added == 1 {
                conn.rpush::<_, _, ()>(keys::HISTORICAL_QUEUE, data)
                    .await
                    .map_err(proxy_redis::RedisError::from)?;
            } else {
                // Already pending for this (coin, day): replace in place so
                // the drain commits the latest value.
                let items: Vec<String> = conn
                    .lrange(keys::HISTORICAL_QUEUE, 0, -1)
                    .await
                    .map_err(proxy_redis::RedisError::from)?;
                for (idx, item) in items.iter().enumerate() {
                    if let Ok(pending) = serde_json::from_str::<HistoricalPrice>(item) {
                        if pending.queue_key() == price.queue_key() {
                            conn.lset::<_, _, ()>(keys::HISTORICAL_QUEUE, idx as isize, &data)
                                .await
                                .map_err(proxy_redis::RedisError::from)?;
                            break;
                        }
                    }
                }
            }
        }

        let queue_len = self.redis.list_len(keys::HISTORICAL_QUEUE).await?;
        if queue_len >= QUEUE_RUN_SIZE {
            self.process_queue().await?;
        }
        Ok(())
    }

    /// Drain the pending list under the shared lock and commit in batches.
    pub async fn process_queue(&self) -> Result<()> {
        if !self.redis.try_queue_lock(keys::LOCK_HISTORICAL_QUEUE).await {
            warn!("Could not acquire historical prices queue lock");
            return Ok(());
        }
        let result = self.drain_queue().await;
        self.redis.unlock(keys::LOCK_HISTORICAL_QUEUE).await;
        result
    }

    async fn drain_queue(&self) -> Result<()> {
        let raw = self.redis.list_range_all(keys::HISTORICAL_QUEUE).await?;
        if raw.is_empty() {
            return Ok(());
        }

        let mut prices = Vec::with_capacity(raw.len());
        for item in &raw {
            match serde_json::from_str::<HistoricalPrice>(item) {
                Ok(price) => prices.push(price),
                Err(e) => warn!(error = %e, "Dropping malformed queued price"),
            }
        }
        debug!(count = prices.len(), "Draining historical price queue");

        let mut result = Ok(());
        for attempt in 1..=MAX_RETRIES {
            match self.commit_batch(&prices).await {
                Ok(()) => {
                    result = Ok(());
                    break;
                }
                Err(DatabaseError::Query(msg)) if is_deadlock_message(&msg) => {
                    error!(attempt, max = MAX_RETRIES, "Deadlock detected, retrying");
                    result = Err(DatabaseError::Query(msg));
                    sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        self.redis.delete(keys::HISTORICAL_QUEUE).await.ok();
        self.redis
            .delete_keys_by_prefix(keys::HISTORICAL_SET_PREFIX)
            .await
            .ok();
        result
    }

    async fn commit_batch(&self, prices: &[HistoricalPrice]) -> Result<()> {
        let today = dates::today_day_date();
        let mut today_sources: HashMap<String, String> = HashMap::new();

        for batch in prices.chunks(COMMIT_BATCH_SIZE) {
            let mut tx = self.db.begin().await?;
            for price in batch {
                sqlx::query(UPSERT_SQL)
                    .bind(&price.coin_id)
                    .bind(price.date)
                    .bind(&price.day_date)
                    .bind(&price.price)
                    .bind(&price.source)
                    .execute(&mut *tx)
                    .await?;
                if price.day_date == today && !price.source.is_empty() {
                    today_sources.insert(price.coin_id.clone(), price.source.clone());
                }
            }
            tx.commit().await?;
        }

        // Coins priced today flow back into the coin queue with their
        // last_price_source updated.
        if !today_sources.is_empty() {
            let ids: Vec<String> = today_sources.keys().cloned().collect();
            match self.coin_repo.get_by_ids(&ids).await {
                Ok(mut coins) => {
                    for coin in &mut coins {
                        if let Some(source) = today_sources.get(&coin.id) {
                            coin.last_price_source = Some(source.clone());
                        }
                    }
                    let coins: Vec<Coin> = coins
                        .into_iter()
                        .filter(|c| !c.chain_id.is_empty() && !c.address.is_empty())
                        .collect();
                    if !coins.is_empty() {
                        if let Err(e) = self.coin_repo.add_to_queue(coins).await {
                            error!(error = %e, "Failed to queue coin source updates");
                        }
                    }
                }
                Err(e) => error!(error = %e, "Failed to load coins for source update"),
            }
        }
        Ok(())
    }
}
