//! Cache key builders.
//!
//! Every key the service writes is assembled here so the layout stays in
//! one place.

/// Current price: `price:current:{coinId}` (10 min TTL).
pub fn current_price_key(coin_id: &str) -> String {
    format!("price:current:{}", coin_id)
}

/// Historical price: `price:historical:{coinId}_{DD-MM-YYYY}`.
pub fn historical_price_key(coin_id: &str, day_date: &str) -> String {
    format!("price:historical:{}_{}", coin_id, day_date)
}

/// Marker set whenever any historical price is cached (7 d TTL).
pub fn historical_exists_key(coin_id: &str) -> String {
    format!("price:historical:exists:{}", coin_id)
}

/// Coalescing result: `price_result:{chainId}_{address}` (5 min TTL, `-1` = no price).
pub fn price_result_key(chain_id: &str, address: &str) -> String {
    format!("price_result:{}_{}", chain_id, address.to_lowercase())
}

/// Coin record cache: `coins:{id}` (72 h TTL).
pub fn coin_key(coin_id: &str) -> String {
    format!("coins:{}", coin_id)
}

/// Coin write-behind queue and its companion dedup set.
pub const COINS_QUEUE: &str = "coins:queue";

pub fn coins_set_key(coin_id: &str) -> String {
    format!("coins:set{}", coin_id)
}

pub const COINS_SET_PREFIX: &str = "coins:set";

/// Full coingecko coin-list cache (72 h TTL).
pub const COINS_LIST: &str = "coins_list";

/// Historical-price write-behind queue and dedup set.
pub const HISTORICAL_QUEUE: &str = "historical_prices:queue";

pub fn historical_set_key(coin_id: &str, day_date: &str) -> String {
    format!("historical_prices:set:{}_{}", coin_id, day_date)
}

pub const HISTORICAL_SET_PREFIX: &str = "historical_prices:set:";

/// Fire-and-forget queues.
pub const LOGS_QUEUE: &str = "logs:queue";
pub const ALERTS_QUEUE: &str = "slack_notifications:queue";

/// Coalescing structures.
pub const UNIQUE_PRICE_REQUESTS: &str = "unique_price_requests";
pub const PRICE_REQUESTS_QUEUE: &str = "price_requests_queue";
pub const PRICE_RESULTS_CHANNEL: &str = "price_results_channel";

/// Throttle state.
pub fn throttle_key(coin_id: &str) -> String {
    format!("coins_throttle:{}", coin_id)
}

pub fn throttle_count_key(coin_id: &str) -> String {
    format!("coins_throttle_count:{}", coin_id)
}

pub fn throttle_alerted_key(coin_id: &str) -> String {
    format!("coins_throttle_count:{}:alerted", coin_id)
}

/// Upstream error accounting.
pub fn error_count_key(source_key: &str) -> String {
    format!("error_count:{}", source_key)
}

/// Per-network request budget for geckoterminal.
pub fn geckoterminal_limit_key(network: &str) -> String {
    format!("geckoterminal:limit:{}", network)
}

/// API-key rate limiter.
pub fn rate_limit_key(token: &str) -> String {
    format!("rate_limit:{}", token)
}

/// Distributed lock names.
pub const LOCK_COINS_QUEUE: &str = "lock:coins_queue";
pub const LOCK_HISTORICAL_QUEUE: &str = "lock:historical_prices_queue";
pub const LOCK_LOGS_QUEUE: &str = "lock:logs_queue";
pub const LOCK_ALERTS_QUEUE: &str = "lock:slack_notifications_queue";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(current_price_key("1_0xabc"), "price:current:1_0xabc");
        assert_eq!(
            historical_price_key("1_0xabc", "15-07-2024"),
            "price:historical:1_0xabc_15-07-2024"
        );
        assert_eq!(
            historical_exists_key("1_0xabc"),
            "price:historical:exists:1_0xabc"
        );
        assert_eq!(price_result_key("1", "0xABC"), "price_result:1_0xabc");
        assert_eq!(coins_set_key("1_0xabc"), "coins:set1_0xabc");
        assert_eq!(
            throttle_alerted_key("1_0xabc"),
            "coins_throttle_count:1_0xabc:alerted"
        );
    }
}
