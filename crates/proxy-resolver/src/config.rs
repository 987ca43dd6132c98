use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Sources never consulted for current prices.
    pub prohibited_current: HashSet<String>,

    /// Sources never consulted for historical prices.
    pub prohibited_historical: HashSet<String>,

    /// Worker poll interval in milliseconds.
    pub process_time_ms: u64,

    /// How long a coalesced caller waits before falling back to a direct
    /// call, in seconds.
    pub process_timeout_secs: u64,

    /// How many queued requests one drain takes.
    pub fetch_size: i64,

    /// How many requests each worker task resolves per batch.
    pub batch_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            prohibited_current: HashSet::new(),
            prohibited_historical: HashSet::new(),
            process_time_ms: 10,
            process_timeout_secs: 15,
            fetch_size: 2000,
            batch_size: 200,
        }
    }
}

fn parse_set(raw: &str) -> HashSet<String> {
    raw.split_whitespace().map(|s| s.to_string()).collect()
}

impl ResolverConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            prohibited_current: std::env::var("PROHIBITED_SOURCES_CURRENT")
                .map(|raw| parse_set(&raw))
                .unwrap_or_default(),
            prohibited_historical: std::env::var("PROHIBITED_SOURCES_HISTORICAL")
                .map(|raw| parse_set(&raw))
                .unwrap_or_default(),
            process_time_ms: std::env::var("PRICE_PROCESS_TIME_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.process_time_ms),
            process_timeout_secs: std::env::var("PRICE_PROCESS_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.process_timeout_secs),
            fetch_size: std::env::var("PRICE_FETCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.fetch_size),
            batch_size: std::env::var("PRICE_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.batch_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        let set = parse_set("dodoexRoute  geckoterminal");
        assert!(set.contains("dodoexRoute"));
        assert!(set.contains("geckoterminal"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.process_time_ms, 10);
        assert_eq!(config.process_timeout_secs, 15);
        assert_eq!(config.fetch_size, 2000);
        assert_eq!(config.batch_size, 200);
    }
}
