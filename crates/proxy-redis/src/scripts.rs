//! Lua scripts: the only mechanism for multi-key atomic updates in the
//! shared cache (enqueue-if-absent, drain-and-clear, rate-limit window).

use crate::connection::RedisConnection;
use crate::{RedisError, Result};
use redis::Script;

/// Enqueue a single request unless its fingerprint is already pending.
const ENQUEUE_UNIQUE: &str = r#"
if redis.call('SADD', KEYS[1], ARGV[1]) == 1 then
    redis.call('RPUSH', KEYS[2], ARGV[2])
    return 1
else
    return 0
end
"#;

/// Batched enqueue: ARGV alternates (fingerprint, record). Returns the
/// number of fingerprints that were new.
const ENQUEUE_UNIQUE_BATCH: &str = r#"
local new_requests_count = 0
for i = 1, #ARGV, 2 do
    local requestKey = ARGV[i]
    local requestInfo = ARGV[i + 1]
    if redis.call('SADD', KEYS[1], requestKey) == 1 then
        redis.call('RPUSH', KEYS[2], requestInfo)
        new_requests_count = new_requests_count + 1
    end
end
return new_requests_count
"#;

/// Atomically take up to ARGV[1] records off the queue and clear their
/// fingerprints from the uniqueness set.
const DRAIN_REQUESTS: &str = r#"
local requests = redis.call('LRANGE', KEYS[1], 0, tonumber(ARGV[1]) - 1)
if #requests > 0 then
    redis.call('LTRIM', KEYS[1], tonumber(ARGV[1]), -1)
    for i = 1, #requests do
        local requestKey = requests[i]:match("([^|]+)")
        if requestKey then
            redis.call('SREM', KEYS[2], requestKey)
        end
    end
end
return requests
"#;

/// Fixed-window rate limiter: INCR + EXPIRE under one evaluation.
const RATE_LIMIT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local interval = tonumber(ARGV[2])
local current = redis.call("GET", key)
if current and tonumber(current) >= limit then
    return 0
else
    redis.call("INCR", key)
    redis.call("EXPIRE", key, interval)
    return 1
end
"#;

impl RedisConnection {
    /// Enqueue a request record if the fingerprint is not already pending.
    /// Returns `true` when this call produced the queue entry.
    pub async fn enqueue_unique_request(
        &self,
        set_key: &str,
        queue_key: &str,
        fingerprint: &str,
        record: &str,
    ) -> Result<bool> {
        let mut conn = self.get_connection();
        let added: i64 = Script::new(ENQUEUE_UNIQUE)
            .key(set_key)
            .key(queue_key)
            .arg(fingerprint)
            .arg(record)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RedisError::Script(e.to_string()))?;
        Ok(added == 1)
    }

    /// Batched enqueue; pairs with empty fingerprints are skipped. Returns
    /// how many entries were new.
    pub async fn enqueue_unique_requests(
        &self,
        set_key: &str,
        queue_key: &str,
        fingerprints: &[String],
        records: &[String],
    ) -> Result<i64> {
        if fingerprints.len() != records.len() {
            return Err(RedisError::Script(
                "fingerprints and records must have the same length".to_string(),
            ));
        }
        let script = Script::new(ENQUEUE_UNIQUE_BATCH);
        let mut invocation = script.key(set_key);
        invocation.key(queue_key);
        let mut any = false;
        for (fingerprint, record) in fingerprints.iter().zip(records) {
            if fingerprint.is_empty() {
                continue;
            }
            invocation.arg(fingerprint).arg(record);
            any = true;
        }
        if !any {
            return Ok(0);
        }
        let mut conn = self.get_connection();
        invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RedisError::Script(e.to_string()))
    }

    /// Atomic drain of up to `fetch_size` pending request records.
    pub async fn drain_requests(
        &self,
        queue_key: &str,
        set_key: &str,
        fetch_size: i64,
    ) -> Result<Vec<String>> {
        let mut conn = self.get_connection();
        Script::new(DRAIN_REQUESTS)
            .key(queue_key)
            .key(set_key)
            .arg(fetch_size)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RedisError::Script(e.to_string()))
    }

    /// One fixed-window rate-limit decision for `key`.
    pub async fn rate_limit_allow(&self, key: &str, limit: f64, interval_secs: u64) -> Result<bool> {
        let mut conn = self.get_connection();
        let allowed: i64 = Script::new(RATE_LIMIT)
            .key(key)
            .arg(limit)
            .arg(interval_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RedisError::Script(e.to_string()))?;
        Ok(allowed == 1)
    }
}
