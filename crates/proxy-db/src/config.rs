use serde::Deserialize;

/// Connection settings for the relational store.
///
/// The pool serves two very different workloads: short point reads from the
/// price path (coin lookups, per-day historical rows) and the write-behind
/// queue drains, which each commit up to 1000 rows in one transaction while
/// holding a distributed lock. The defaults leave room for every drain kind
/// to run concurrently without starving reads.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Server-side cap on a single statement, in milliseconds. Queue drains
    /// run under 15-second distributed locks; no statement may outlive the
    /// lock that guards its drain.
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    // Four drain kinds plus the coalescing worker batches plus API reads.
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_statement_timeout() -> u64 {
    // Under the 15 s drain-lock TTL with margin for retries.
    10_000
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_max_connections),
            min_connections: std::env::var("DATABASE_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_min_connections),
            connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_connect_timeout),
            idle_timeout_secs: std::env::var("DATABASE_IDLE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_idle_timeout),
            statement_timeout_ms: std::env::var("DATABASE_STATEMENT_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_statement_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_timeout_stays_under_drain_lock_ttl() {
        // Drain locks expire after 15 s; a statement that runs longer would
        // commit after another instance took over the queue.
        assert!(default_statement_timeout() < 15_000);
    }
}
