use crate::connection::RedisConnection;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Default lock parameters: 15 s TTL, 3 attempts, 1 s apart.
pub const LOCK_TTL: Duration = Duration::from_secs(15);
pub const LOCK_RETRY_COUNT: usize = 3;
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(1);

impl RedisConnection {
    /// Set-if-absent lock. Returns `true` when this instance holds the lock.
    pub async fn try_lock(&self, lock_key: &str, ttl: Duration) -> bool {
        let mut conn = self.get_connection();
        let result: std::result::Result<Option<String>, redis::RedisError> = redis::cmd("SET")
            .arg(lock_key)
            .arg("locked")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await;
        match result {
            Ok(Some(_)) => true,
            Ok(None) => {
                debug!(lock = %lock_key, "Lock held by another instance");
                false
            }
            Err(e) => {
                debug!(lock = %lock_key, error = %e, "Failed to acquire lock");
                false
            }
        }
    }

    /// Release a lock held by this instance.
    pub async fn unlock(&self, lock_key: &str) {
        let mut conn = self.get_connection();
        let _: std::result::Result<(), redis::RedisError> =
            redis::cmd("DEL").arg(lock_key).query_async(&mut conn).await;
    }

    /// Retry `try_lock` with bounded spacing. Returns `false` if every
    /// attempt lost the race.
    pub async fn try_lock_with_retry(
        &self,
        lock_key: &str,
        ttl: Duration,
        attempts: usize,
        spacing: Duration,
    ) -> bool {
        for attempt in 1..=attempts {
            if self.try_lock(lock_key, ttl).await {
                return true;
            }
            if attempt < attempts {
                sleep(spacing).await;
            }
        }
        false
    }

    /// Acquire a lock with the standard queue-drain parameters.
    pub async fn try_queue_lock(&self, lock_key: &str) -> bool {
        self.try_lock_with_retry(lock_key, LOCK_TTL, LOCK_RETRY_COUNT, LOCK_RETRY_INTERVAL)
            .await
    }
}
