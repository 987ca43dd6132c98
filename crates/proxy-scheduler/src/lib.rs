//! Periodic maintenance tasks.
//!
//! Every task is an independent interval loop guarded by its own named
//! distributed lock, so any number of instances share the work without
//! leader election. No task holds its lock beyond the lock TTL.

use proxy_db::repositories::{
    AlertRepository, CoinRepository, HistoricalPriceRepository, RequestLogRepository,
};
use proxy_redis::RedisConnection;
use proxy_sources::CoingeckoSource;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

const MINUTE: Duration = Duration::from_secs(60);

pub struct Scheduler {
    redis: RedisConnection,
    coin_repo: CoinRepository,
    historical_repo: HistoricalPriceRepository,
    alert_repo: AlertRepository,
    request_log_repo: RequestLogRepository,
    coingecko: CoingeckoSource,
}

impl Scheduler {
    pub fn new(
        redis: RedisConnection,
        coin_repo: CoinRepository,
        historical_repo: HistoricalPriceRepository,
        alert_repo: AlertRepository,
        request_log_repo: RequestLogRepository,
        coingecko: CoingeckoSource,
    ) -> Self {
        Self {
            redis,
            coin_repo,
            historical_repo,
            alert_repo,
            request_log_repo,
            coingecko,
        }
    }

    /// Spawn every periodic task.
    pub fn start(&self) {
        {
            let repo = self.coin_repo.clone();
            spawn_periodic(
                self.redis.clone(),
                "coins_queue",
                Duration::from_secs(5 * 60),
                "coins_process_queue_lock",
                MINUTE,
                move || {
                    let repo = repo.clone();
                    async move { log_outcome("coins_queue", repo.process_queue().await) }
                },
            );
        }
        {
            let repo = self.historical_repo.clone();
            spawn_periodic(
                self.redis.clone(),
                "historical_prices_queue",
                Duration::from_secs(5 * 60),
                "coin_historical_price_process_queue_lock",
                MINUTE,
                move || {
                    let repo = repo.clone();
                    async move { log_outcome("historical_prices_queue", repo.process_queue().await) }
                },
            );
        }
        {
            let coingecko = self.coingecko.clone();
            spawn_periodic(
                self.redis.clone(),
                "sync_coins",
                Duration::from_secs(72 * 60 * 60),
                "sync_coins_lock",
                Duration::from_secs(5 * 60),
                move || {
                    let coingecko = coingecko.clone();
                    async move {
                        match coingecko.sync_coins().await {
                            Ok(()) => info!(task = "sync_coins", "Task completed"),
                            Err(e) => error!(task = "sync_coins", error = %e, "Task failed"),
                        }
                    }
                },
            );
        }
        {
            let repo = self.coin_repo.clone();
            spawn_periodic(
                self.redis.clone(),
                "refresh_all_coins_cache",
                Duration::from_secs(4 * 60 * 60),
                "sync_coins_cache_lock",
                Duration::from_secs(5 * 60),
                move || {
                    let repo = repo.clone();
                    async move {
                        log_outcome("refresh_all_coins_cache", repo.refresh_all_coins_cache().await)
                    }
                },
            );
        }
        {
            let repo = self.alert_repo.clone();
            spawn_periodic(
                self.redis.clone(),
                "release_top_throttled",
                MINUTE,
                "sync_process_top_notifications_lock",
                MINUTE,
                move || {
                    let repo = repo.clone();
                    async move {
                        log_outcome("release_top_throttled", repo.process_top_notifications().await)
                    }
                },
            );
        }
        {
            let repo = self.alert_repo.clone();
            spawn_periodic(
                self.redis.clone(),
                "alerts_queue",
                Duration::from_secs(15),
                "sync_process_slack_notifications_lock",
                MINUTE,
                move || {
                    let repo = repo.clone();
                    async move { log_outcome("alerts_queue", repo.process_queue().await) }
                },
            );
        }
        {
            let repo = self.request_log_repo.clone();
            spawn_periodic(
                self.redis.clone(),
                "request_logs_queue",
                Duration::from_secs(15),
                "sync_process_request_logs_lock",
                MINUTE,
                move || {
                    let repo = repo.clone();
                    async move { log_outcome("request_logs_queue", repo.process_queue().await) }
                },
            );
        }
        {
            let alerts = self.alert_repo.clone();
            let logs = self.request_log_repo.clone();
            spawn_periodic(
                self.redis.clone(),
                "delete_old_data",
                Duration::from_secs(8 * 60 * 60),
                "sync_delete_old_data_lock",
                MINUTE,
                move || {
                    let alerts = alerts.clone();
                    let logs = logs.clone();
                    async move {
                        log_outcome("delete_old_alerts", alerts.delete_old().await);
                        log_outcome("delete_old_request_logs", logs.delete_old().await);
                    }
                },
            );
        }
        info!("Scheduler tasks started");
    }
}

fn log_outcome(task: &'static str, result: proxy_db::Result<()>) {
    match result {
        Ok(()) => info!(task, "Task completed"),
        Err(e) => error!(task, error = %e, "Task failed"),
    }
}

fn spawn_periodic<F, Fut>(
    redis: RedisConnection,
    name: &'static str,
    period: Duration,
    lock_key: &'static str,
    lock_ttl: Duration,
    task: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so every task waits one
        // full period after startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !redis.try_lock(lock_key, lock_ttl).await {
                continue;
            }
            task().await;
            redis.unlock(lock_key).await;
        }
    });
    tracing::debug!(task = name, period_secs = period.as_secs(), "Periodic task registered");
}
