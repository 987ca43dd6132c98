use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One `(coin, day)` price observation.
///
/// `day_date` is `DD-MM-YYYY`; `(coin_id, day_date)` is the conflict key.
/// Price is kept as the upstream's decimal string.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct HistoricalPrice {
    pub coin_id: String,
    /// Unix timestamp of the observation.
    pub date: i64,
    pub day_date: String,
    pub price: String,
    pub source: String,
}

impl HistoricalPrice {
    pub fn new(coin_id: String, date: i64, price: String, source: &str) -> Self {
        let day_date = proxy_core::dates::day_date(date);
        Self {
            coin_id,
            date,
            day_date,
            price,
            source: source.to_string(),
        }
    }

    /// Dedup key used by the pending queue.
    pub fn queue_key(&self) -> String {
        format!("{}_{}", self.coin_id, self.day_date)
    }
}
