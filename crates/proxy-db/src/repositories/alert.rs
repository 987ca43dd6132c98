use crate::models::AlertRecord;
use crate::pool::DatabasePool;
use crate::repositories::{MAX_RETRIES, RETRY_DELAY};
use crate::{is_deadlock_message, DatabaseError, Result};
use proxy_core::dates;
use proxy_redis::{keys, RedisConnection};
use sqlx::Postgres;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, warn};

const WORKER_COUNT: usize = 8;
const TASK_QUEUE_CAPACITY: usize = 1000;
const COMMIT_BATCH_SIZE: usize = 1000;

/// On conflict: a tombstoned row is revived with the fresh counter, a live
/// row accumulates.
const UPSERT_SQL: &str = r#"
INSERT INTO slack_notifications (source, coin_id, day_date, date, counter)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (coin_id, day_date) DO UPDATE SET
    counter = CASE WHEN slack_notifications.deleted_at IS NOT NULL
                   THEN EXCLUDED.counter
                   ELSE slack_notifications.counter + EXCLUDED.counter END,
    deleted_at = NULL,
    date = EXCLUDED.date,
    updated_at = NOW()
"#;

/// Alert-record store: throttler lockouts flow through a worker pool into a
/// shared queue, drained periodically; the top-10 harvest releases the
/// noisiest coins.
#[derive(Clone)]
pub struct AlertRepository {
    db: DatabasePool,
    redis: RedisConnection,
    sender: mpsc::Sender<AlertRecord>,
}

impl AlertRepository {
    pub fn new(db: DatabasePool, redis: RedisConnection) -> Self {
        let (sender, receiver) = mpsc::channel(TASK_QUEUE_CAPACITY);
        let receiver = Arc::new(Mutex::new(receiver));
        for _ in 0..WORKER_COUNT {
            let redis = redis.clone();
            let receiver = receiver.clone();
            tokio::spawn(Self::worker(redis, receiver));
        }
        Self { db, redis, sender }
    }

    async fn worker(redis: RedisConnection, receiver: Arc<Mutex<mpsc::Receiver<AlertRecord>>>) {
        loop {
            let record = {
                let mut rx = receiver.lock().await;
                rx.recv().await
            };
            let Some(record) = record else {
                return;
            };
            match serde_json::to_string(&record) {
                Ok(data) => {
                    if let Err(e) = redis.list_push(keys::ALERTS_QUEUE, &data).await {
                        error!(error = %e, "Failed to enqueue alert record");
                    }
                }
                Err(e) => error!(error = %e, "Failed to serialize alert record"),
            }
        }
    }

    /// Hand a record to the worker pool; a full pool drops it.
    pub fn insert_alert(&self, record: AlertRecord) {
        if self.sender.try_send(record).is_err() {
            debug!("Alert task queue is full, dropping record");
        }
    }

    /// Drain the shared queue: merge counters per (coin, day) and commit.
    pub async fn process_queue(&self) -> Result<()> {
        if !self.redis.try_queue_lock(keys::LOCK_ALERTS_QUEUE).await {
            warn!("Could not acquire alerts queue lock");
            return Ok(());
        }
        let result = self.drain_queue().await;
        self.redis.unlock(keys::LOCK_ALERTS_QUEUE).await;
        result
    }

    async fn drain_queue(&self) -> Result<()> {
        let raw = self.redis.list_range_all(keys::ALERTS_QUEUE).await?;
        if raw.is_empty() {
            return Ok(());
        }

        let mut merged: HashMap<String, AlertRecord> = HashMap::new();
        for item in &raw {
            match serde_json::from_str::<AlertRecord>(item) {
                Ok(record) => {
                    merged
                        .entry(record.merge_key())
                        .and_modify(|existing| {
                            existing.counter += record.counter;
                            existing.date = record.date;
                            existing.source = record.source.clone();
                        })
                        .or_insert(record);
                }
                Err(e) => warn!(error = %e, "Dropping malformed queued alert"),
            }
        }
        let records: Vec<AlertRecord> = merged.into_values().collect();
        debug!(count = records.len(), "Draining alert queue");

        let mut result = Ok(());
        for attempt in 1..=MAX_RETRIES {
            match self.insert_batches(&records).await {
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

        self.redis.delete(keys::ALERTS_QUEUE).await.ok();
        result
    }

    async fn insert_batches(&self, records: &[AlertRecord]) -> Result<()> {
        for batch in records.chunks(COMMIT_BATCH_SIZE) {
            let mut tx = self.db.begin().await?;
            for record in batch {
                sqlx::query(UPSERT_SQL)
                    .bind(&record.source)
                    .bind(&record.coin_id)
                    .bind(&record.day_date)
                    .bind(record.date)
                    .bind(record.counter)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
        }
        Ok(())
    }

    /// Release the top-10 noisiest coins of the current UTC day: drop their
    /// throttle state and remove the harvested rows.
    pub async fn process_top_notifications(&self) -> Result<()> {
        let midnight = dates::midnight_unix();
        let top = sqlx::query_as::<Postgres, AlertRecord>(
            "SELECT source, coin_id, day_date, date, counter FROM slack_notifications \
             WHERE date > $1 AND deleted_at IS NULL ORDER BY counter DESC LIMIT 10",
        )
        .bind(midnight)
        .fetch_all(self.db.inner())
        .await?;

        if top.is_empty() {
            return Ok(());
        }
        debug!(count = top.len(), "Releasing top throttled coins");

        let mut keys_to_delete = Vec::with_capacity(top.len() * 4);
        for record in &top {
            keys_to_delete.push(keys::throttle_key(&record.coin_id));
            keys_to_delete.push(keys::throttle_count_key(&record.coin_id));
            if let Some(day_date) = dates::alert_day_to_day_date(&record.day_date) {
                // Historical lookups are throttled under a day-suffixed id.
                let historical_id = format!("{}_{}", record.coin_id, day_date);
                keys_to_delete.push(keys::throttle_key(&historical_id));
                keys_to_delete.push(keys::throttle_count_key(&historical_id));
            }
        }
        if let Err(e) = self.redis.delete_key_batch(&keys_to_delete).await {
            error!(error = %e, "Failed to delete throttle keys in batch");
        }

        for record in &top {
            if let Err(e) = sqlx::query(
                "UPDATE slack_notifications SET deleted_at = NOW() \
                 WHERE coin_id = $1 AND day_date = $2",
            )
            .bind(&record.coin_id)
            .bind(&record.day_date)
            .execute(self.db.inner())
            .await
            {
                error!(error = %e, coin_id = %record.coin_id, "Failed to remove alert record");
            }
        }
        Ok(())
    }

    /// Physically delete alert rows past the 3-day retention window.
    pub async fn delete_old(&self) -> Result<()> {
        let deleted = sqlx::query(
            "DELETE FROM slack_notifications WHERE created_at < NOW() - INTERVAL '3 days'",
        )
        .execute(self.db.inner())
        .await?;
        debug!(rows = deleted.rows_affected(), "Deleted old alert records");
        Ok(())
    }
}
