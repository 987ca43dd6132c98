use proxy_core::chains;
use proxy_db::repositories::CoinRepository;
use proxy_redis::{keys, RedisConnection};
use std::time::Duration;
use tracing::error;

/// Throttle key TTL while the failure counter is still below the limit.
const THROTTLE_DURATION: Duration = Duration::from_secs(60);

/// Failure counter window.
const COUNT_RESET_DURATION: Duration = Duration::from_secs(30 * 60);

/// Failures within the window before a lockout is imposed.
const MAX_THROTTLE_COUNT: i64 = 3;

/// Lockout after an upstream 429. Short: the provider asked us to back off,
/// the coin itself is fine.
const RATE_LIMITED_LOCKOUT: Duration = Duration::from_secs(3 * 60);

/// Alert-flag window.
const ALERT_FLAG_TTL: Duration = Duration::from_secs(30 * 60);

const LOCKOUT_WITH_HISTORY: Duration = Duration::from_secs(60);
const LOCKOUT_UNKNOWN_COIN: Duration = Duration::from_secs(24 * 60 * 60);
const LOCKOUT_KNOWN_COIN: Duration = Duration::from_secs(30 * 60);

/// Lockout duration for an escalated coin: a coin with cached history is
/// only paused briefly, a coin no store knows gets the long lockout.
fn lockout_duration(has_history: bool, coin_exists: bool) -> Duration {
    if has_history {
        LOCKOUT_WITH_HISTORY
    } else if !coin_exists {
        LOCKOUT_UNKNOWN_COIN
    } else {
        LOCKOUT_KNOWN_COIN
    }
}

/// Per-coin failure counters escalating to timed lockouts.
#[derive(Clone)]
pub struct CoinsThrottler {
    redis: RedisConnection,
    coin_repo: CoinRepository,
}

impl CoinsThrottler {
    pub fn new(redis: RedisConnection, coin_repo: CoinRepository) -> Self {
        Self { redis, coin_repo }
    }

    /// Whether requests for this coin are currently suppressed.
    pub async fn is_throttled(&self, coin_id: &str) -> bool {
        let chain_id = coin_id.split('_').next().unwrap_or_default();
        if chains::is_chain_refused(chain_id) {
            return true;
        }
        matches!(
            self.redis.get_string(&keys::throttle_key(coin_id)).await,
            Ok(Some(_))
        )
    }

    /// Record a failed lookup. Returns `true` when the failure escalated to
    /// a lockout and an operator alert should be recorded.
    pub async fn throttle(&self, coin_id: &str, request_status: &str) -> bool {
        let chain_id = coin_id.split('_').next().unwrap_or_default();
        if chains::is_chain_refused(chain_id) {
            return false;
        }

        // 429 is the provider's problem, not the coin's: short lockout, no
        // alert accounting.
        if request_status == "429" {
            if let Err(e) = self
                .redis
                .set_string(&keys::throttle_key(coin_id), "1", RATE_LIMITED_LOCKOUT)
                .await
            {
                error!(error = %e, coin_id = %coin_id, "Failed to set throttle key");
            }
            return false;
        }

        let count = match self.incr_with_window(&keys::throttle_count_key(coin_id)).await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, coin_id = %coin_id, "Failed to bump throttle counter");
                return false;
            }
        };

        if count < MAX_THROTTLE_COUNT {
            if let Err(e) = self
                .redis
                .set_string(&keys::throttle_key(coin_id), "1", THROTTLE_DURATION)
                .await
            {
                error!(error = %e, coin_id = %coin_id, "Failed to set throttle key");
            }
            return false;
        }

        let has_history = self
            .redis
            .has_historical_price(coin_id)
            .await
            .unwrap_or(false);
        let coin_exists = match self.coin_repo.check_coin_exists(coin_id).await {
            Ok(exists) => exists,
            Err(e) => {
                error!(error = %e, coin_id = %coin_id, "Failed to check coin existence");
                return false;
            }
        };

        let duration = lockout_duration(has_history, coin_exists);
        if let Err(e) = self
            .redis
            .set_string(&keys::throttle_key(coin_id), "1", duration)
            .await
        {
            error!(error = %e, coin_id = %coin_id, "Failed to set lockout key");
            return false;
        }

        if let Err(e) = self
            .incr_alert_flag(&keys::throttle_alerted_key(coin_id))
            .await
        {
            error!(error = %e, coin_id = %coin_id, "Failed to set alert flag");
        }
        self.redis
            .delete(&keys::throttle_count_key(coin_id))
            .await
            .ok();
        true
    }

    async fn incr_with_window(&self, key: &str) -> proxy_redis::Result<i64> {
        let mut conn = self.redis.get_connection();
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(COUNT_RESET_DURATION.as_secs())
                .query_async::<()>(&mut conn)
                .await?;
        }
        Ok(count)
    }

    async fn incr_alert_flag(&self, key: &str) -> proxy_redis::Result<()> {
        let mut conn = self.redis.get_connection();
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(ALERT_FLAG_TTL.as_secs())
                .query_async::<()>(&mut conn)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lockout_duration_history_wins() {
        // Cached history means the coin is real and the miss is transient.
        assert_eq!(lockout_duration(true, true), Duration::from_secs(60));
        assert_eq!(lockout_duration(true, false), Duration::from_secs(60));
    }

    #[test]
    fn test_lockout_duration_unknown_coin_is_longest() {
        assert_eq!(
            lockout_duration(false, false),
            Duration::from_secs(24 * 60 * 60)
        );
    }

    #[test]
    fn test_lockout_duration_known_coin() {
        assert_eq!(lockout_duration(false, true), Duration::from_secs(30 * 60));
    }
}
