use crate::models::RequestLog;
use crate::pool::DatabasePool;
use crate::repositories::{MAX_RETRIES, RETRY_DELAY};
use crate::{is_deadlock_message, DatabaseError, Result};
use proxy_redis::{keys, RedisConnection};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Worker pool fronting the queue writes.
const WORKER_COUNT: usize = 8;
const TASK_QUEUE_CAPACITY: usize = 1000;

/// Commit batch size (one transaction per batch).
const COMMIT_BATCH_SIZE: usize = 1000;

/// Fire-and-forget request-log store: a worker pool pushes records into a
/// shared list, the scheduler drains the list into Postgres.
#[derive(Clone)]
pub struct RequestLogRepository {
    db: DatabasePool,
    redis: RedisConnection,
    sender: mpsc::Sender<RequestLog>,
}

impl RequestLogRepository {
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

    async fn worker(redis: RedisConnection, receiver: Arc<Mutex<mpsc::Receiver<RequestLog>>>) {
        loop {
            let log = {
                let mut rx = receiver.lock().await;
                rx.recv().await
            };
            let Some(log) = log else {
                return;
            };
            match serde_json::to_string(&log) {
                Ok(data) => {
                    if let Err(e) = redis.list_push(keys::LOGS_QUEUE, &data).await {
                        error!(error = %e, "Failed to enqueue request log");
                    }
                }
                Err(e) => error!(error = %e, "Failed to serialize request log"),
            }
        }
    }

    /// Hand a log record to the worker pool. Never blocks the caller; a full
    /// pool drops the record.
    pub fn insert_log(&self, log: RequestLog) {
        if self.sender.try_send(log).is_err() {
            debug!("Request log task queue is full, dropping record");
        }
    }

    /// Drain the shared list into Postgres under the queue lock.
    pub async fn process_queue(&self) -> Result<()> {
        if !self.redis.try_queue_lock(keys::LOCK_LOGS_QUEUE).await {
            warn!("Could not acquire logs queue lock");
            return Ok(());
        }
        let result = self.drain_queue().await;
        self.redis.unlock(keys::LOCK_LOGS_QUEUE).await;
        result
    }

    async fn drain_queue(&self) -> Result<()> {
        let raw = self.redis.list_range_all(keys::LOGS_QUEUE).await?;
        if raw.is_empty() {
            return Ok(());
        }

        let mut logs = Vec::with_capacity(raw.len());
        for item in &raw {
            match serde_json::from_str::<RequestLog>(item) {
                Ok(log) => logs.push(log),
                Err(e) => warn!(error = %e, "Dropping malformed queued log"),
            }
        }
        debug!(count = logs.len(), "Draining request log queue");

        let mut result = Ok(());
        for attempt in 1..=MAX_RETRIES {
            match self.insert_batches(&logs).await {
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

        self.redis.delete(keys::LOGS_QUEUE).await.ok();
        result
    }

    async fn insert_batches(&self, logs: &[RequestLog]) -> Result<()> {
        for batch in logs.chunks(COMMIT_BATCH_SIZE) {
            let mut tx = self.db.begin().await?;
            for log in batch {
                sqlx::query(
                    "INSERT INTO request_logs (ip_address, endpoint, request_params, response, execution_time) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(&log.ip_address)
                .bind(&log.endpoint)
                .bind(&log.request_params)
                .bind(&log.response)
                .bind(log.execution_time)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
        }
        Ok(())
    }

    /// Physically delete logs past the 3-day retention window.
    pub async fn delete_old(&self) -> Result<()> {
        let deleted = sqlx::query(
            "DELETE FROM request_logs WHERE created_at < NOW() - INTERVAL '3 days'",
        )
        .execute(self.db.inner())
        .await?;
        debug!(rows = deleted.rows_affected(), "Deleted old request logs");
        Ok(())
    }
}
