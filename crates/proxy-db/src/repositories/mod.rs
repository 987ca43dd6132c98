mod alert;
mod app_token;
mod coins;
mod historical;
mod request_log;

pub use alert::AlertRepository;
pub use app_token::AppTokenRepository;
pub use coins::CoinRepository;
pub use historical::HistoricalPriceRepository;
pub use request_log::RequestLogRepository;

use std::collections::HashMap;
use std::time::Duration;

/// Retry budget for queue drains hitting transient store errors.
pub(crate) const MAX_RETRIES: usize = 3;
pub(crate) const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Deduplicate a vector by key, keeping the last occurrence (most recent)
pub(crate) fn dedup_by_key<T, K, F>(items: Vec<T>, key_fn: F) -> Vec<T>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut seen: HashMap<K, usize> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        seen.insert(key_fn(item), idx);
    }
    items
        .into_iter()
        .enumerate()
        .filter(|(idx, item)| seen.get(&key_fn(item)) == Some(idx))
        .map(|(_, item)| item)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_by_key_keeps_last() {
        let items = vec![("a", 1), ("b", 2), ("a", 3)];
        let deduped = dedup_by_key(items, |(k, _)| *k);
        assert_eq!(deduped, vec![("b", 2), ("a", 3)]);
    }

    #[test]
    fn test_dedup_by_key_empty() {
        let items: Vec<(&str, i32)> = vec![];
        assert!(dedup_by_key(items, |(k, _)| *k).is_empty());
    }
}
