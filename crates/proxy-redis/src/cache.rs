use crate::connection::RedisConnection;
use crate::{keys, Result};
use proxy_core::dates;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error};

/// TTLs for the price cache layout.
pub const CURRENT_PRICE_TTL: Duration = Duration::from_secs(10 * 60);
pub const HISTORICAL_PRICE_TTL_TODAY: Duration = Duration::from_secs(24 * 60 * 60);
pub const HISTORICAL_PRICE_TTL_OLDER: Duration = Duration::from_secs(72 * 60 * 60);
pub const HISTORICAL_EXISTS_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Batch size and retry budget for bulk deletes.
const DELETE_BATCH_SIZE: usize = 1000;
const DELETE_MAX_RETRIES: usize = 3;

impl RedisConnection {
    /// Get a string value, treating a missing key as `None`.
    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.get_connection();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    /// Set a string value with a TTL.
    pub async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_connection();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    /// Pipelined multi-get; missing keys are absent from the result map.
    pub async fn get_many(&self, cache_keys: &[String]) -> Result<HashMap<String, String>> {
        let mut found = HashMap::new();
        if cache_keys.is_empty() {
            return Ok(found);
        }
        let mut conn = self.get_connection();
        let mut pipe = redis::pipe();
        for key in cache_keys {
            pipe.get(key);
        }
        let values: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        for (key, value) in cache_keys.iter().zip(values) {
            if let Some(v) = value {
                if !v.is_empty() {
                    found.insert(key.clone(), v);
                }
            }
        }
        Ok(found)
    }

    /// Get and deserialize a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_string(key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    /// Serialize and set a JSON value with a TTL.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set_string(key, &raw, ttl).await
    }

    /// Delete a single key.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_connection();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// Delete keys in pipelined batches of at most 1000, retrying each batch
    /// up to 3 times.
    pub async fn delete_key_batch(&self, cache_keys: &[String]) -> Result<()> {
        let mut conn = self.get_connection();
        for batch in cache_keys.chunks(DELETE_BATCH_SIZE) {
            let mut attempt = 0;
            loop {
                attempt += 1;
                let mut pipe = redis::pipe();
                for key in batch {
                    pipe.del(key).ignore();
                }
                match pipe.query_async::<()>(&mut conn).await {
                    Ok(()) => break,
                    Err(e) if attempt < DELETE_MAX_RETRIES => {
                        error!(error = %e, attempt, "Batch delete failed, retrying");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Scan for keys under a prefix and delete them in batches.
    pub async fn delete_keys_by_prefix(&self, prefix: &str) -> Result<()> {
        let mut conn = self.get_connection();
        let pattern = format!("{}*", prefix);
        let mut matched: Vec<String> = Vec::new();
        {
            let mut iter = conn.scan_match::<_, String>(&pattern).await?;
            while let Some(key) = iter.next_item().await {
                matched.push(key);
            }
        }
        if matched.is_empty() {
            return Ok(());
        }
        debug!(prefix = %prefix, count = matched.len(), "Deleting keys by prefix");
        self.delete_key_batch(&matched).await
    }

    /// List length.
    pub async fn list_len(&self, key: &str) -> Result<i64> {
        let mut conn = self.get_connection();
        let len: i64 = conn.llen(key).await?;
        Ok(len)
    }

    /// Full list contents.
    pub async fn list_range_all(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection();
        let items: Vec<String> = conn.lrange(key, 0, -1).await?;
        Ok(items)
    }

    /// Right-push a value onto a list.
    pub async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.get_connection();
        conn.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    /// Cache a current price under `price:current:{coinId}`.
    pub async fn set_current_price(&self, coin_id: &str, price: &str) -> Result<()> {
        self.set_string(&keys::current_price_key(coin_id), price, CURRENT_PRICE_TTL)
            .await
    }

    /// Look up a single current price.
    pub async fn get_current_price(&self, coin_id: &str) -> Result<Option<String>> {
        self.get_string(&keys::current_price_key(coin_id)).await
    }

    /// Pipelined current-price lookup; the result map is keyed by coin id.
    pub async fn get_current_prices(&self, coin_ids: &[String]) -> Result<HashMap<String, String>> {
        let cache_keys: Vec<String> = coin_ids
            .iter()
            .map(|id| keys::current_price_key(id))
            .collect();
        let found = self.get_many(&cache_keys).await?;
        let mut prices = HashMap::with_capacity(found.len());
        for (key, price) in found {
            if let Some(id) = key.strip_prefix("price:current:") {
                prices.insert(id.to_string(), price);
            }
        }
        Ok(prices)
    }

    /// Cache a historical price. Today's entries get 24 h, older ones 72 h,
    /// and the existence marker is refreshed either way.
    pub async fn set_historical_price(
        &self,
        coin_id: &str,
        day_date: &str,
        price: &str,
    ) -> Result<()> {
        let ttl = if day_date == dates::today_day_date() {
            HISTORICAL_PRICE_TTL_TODAY
        } else {
            HISTORICAL_PRICE_TTL_OLDER
        };
        self.set_string(
            &keys::historical_exists_key(coin_id),
            "1",
            HISTORICAL_EXISTS_TTL,
        )
        .await?;
        self.set_string(&keys::historical_price_key(coin_id, day_date), price, ttl)
            .await
    }

    /// Look up one historical price from cache.
    pub async fn get_historical_price(
        &self,
        coin_id: &str,
        day_date: &str,
    ) -> Result<Option<String>> {
        self.get_string(&keys::historical_price_key(coin_id, day_date))
            .await
    }

    /// Whether any historical price was ever cached for this coin.
    pub async fn has_historical_price(&self, coin_id: &str) -> Result<bool> {
        Ok(self
            .get_string(&keys::historical_exists_key(coin_id))
            .await?
            .as_deref()
            == Some("1"))
    }
}
