use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Operator alert row produced by the throttler.
///
/// `(coin_id, day_date)` is the conflict key; `day_date` here uses the
/// alert format `YYYY-MM-DD`. On conflict the counter accumulates unless the
/// existing row was tombstoned, in which case it is revived with the new
/// counter.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AlertRecord {
    pub source: String,
    pub coin_id: String,
    pub day_date: String,
    /// Unix timestamp of the triggering request.
    pub date: i64,
    pub counter: i32,
}

impl AlertRecord {
    pub fn new(source: &str, coin_id: String, day_date: String, date: i64) -> Self {
        Self {
            source: source.to_string(),
            coin_id,
            day_date,
            date,
            counter: 1,
        }
    }

    /// Merge key used when draining the queue.
    pub fn merge_key(&self) -> String {
        format!("{}_{}", self.coin_id, self.day_date)
    }
}
