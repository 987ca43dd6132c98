//! Operator webhook notifications for repeated upstream failures.
//!
//! Failures are counted per upstream key in the shared cache; crossing the
//! threshold posts one deduplicated message. Notification failures are
//! logged and never affect the request path.

use proxy_redis::{keys, RedisConnection};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Counter window and alert threshold.
const ERROR_COUNT_TTL: Duration = Duration::from_secs(10 * 60);
const ERROR_THRESHOLD: i64 = 5;
const REPORT_LOCK_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Webhook endpoint; notifications are disabled when unset.
    pub webhook_url: Option<String>,
    pub channel: String,
    pub username: String,
}

impl NotifierConfig {
    pub fn from_env() -> Self {
        Self {
            webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok(),
            channel: std::env::var("ALERT_CHANNEL")
                .unwrap_or_else(|_| "#price-api-alert".to_string()),
            username: std::env::var("ALERT_USERNAME").unwrap_or_else(|_| "price-bot".to_string()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    channel: &'a str,
    username: &'a str,
    text: &'a str,
}

/// Posts operator alerts to the configured webhook.
#[derive(Clone)]
pub struct AlertNotifier {
    client: Client,
    config: NotifierConfig,
    redis: RedisConnection,
}

impl AlertNotifier {
    pub fn new(config: NotifierConfig, redis: RedisConnection) -> Self {
        Self {
            client: Client::new(),
            config,
            redis,
        }
    }

    /// Count one upstream failure for `source_key`; at the threshold, post a
    /// single alert and reset the counter. Deduplicated across instances via
    /// a short lock plus the `:alerted` flag.
    pub async fn report_upstream_error(&self, source_key: &str, message: &str) {
        let count_key = keys::error_count_key(source_key);
        let alerted_key = format!("{}:alerted", count_key);
        let lock_key = format!("{}:lock", count_key);

        if !self.redis.try_lock(&lock_key, REPORT_LOCK_TTL).await {
            return;
        }

        let result = self.count_and_alert(&count_key, &alerted_key, source_key, message).await;
        self.redis.unlock(&lock_key).await;
        if let Err(e) = result {
            warn!(error = %e, source = %source_key, "Upstream error accounting failed");
        }
    }

    async fn count_and_alert(
        &self,
        count_key: &str,
        alerted_key: &str,
        source_key: &str,
        message: &str,
    ) -> proxy_redis::Result<()> {
        if self.redis.get_string(alerted_key).await?.is_some() {
            return Ok(());
        }

        let mut conn = self.redis.get_connection();
        let count: i64 = redis::cmd("INCR").arg(count_key).query_async(&mut conn).await?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(count_key)
                .arg(ERROR_COUNT_TTL.as_secs())
                .query_async::<()>(&mut conn)
                .await?;
        }

        if count >= ERROR_THRESHOLD {
            self.redis
                .set_string(alerted_key, "1", ERROR_COUNT_TTL)
                .await?;
            self.send(&format!(
                "Upstream errors reached threshold for {}: {}",
                source_key, message
            ))
            .await;
            self.redis.delete(count_key).await?;
        }
        Ok(())
    }

    /// Send a message to the configured webhook.
    ///
    /// Does not fail on error, just logs a warning - notification failures
    /// must not affect the price path.
    pub async fn send(&self, text: &str) {
        let Some(url) = self.config.webhook_url.as_deref() else {
            debug!("Alert webhook not configured, dropping notification");
            return;
        };

        let payload = WebhookPayload {
            channel: &self.config.channel,
            username: &self.config.username,
            text,
        };

        match self.client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("Alert notification sent successfully");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(status = %status, body = %body, "Alert webhook returned error");
            }
            Err(e) => {
                warn!(error = %e, "Failed to send alert notification");
            }
        }
    }
}
