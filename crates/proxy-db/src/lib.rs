pub mod config;
pub mod models;
pub mod pool;
pub mod repositories;

pub use config::DatabaseConfig;
pub use pool::DatabasePool;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Alias cycle detected for coin: {0}")]
    AliasCycle(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::Query(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::Migration(err.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

impl From<proxy_redis::RedisError> for DatabaseError {
    fn from(err: proxy_redis::RedisError) -> Self {
        DatabaseError::Cache(err.to_string())
    }
}

/// Postgres deadlock (SQLSTATE 40P01), retried by the queue drains.
pub fn is_deadlock_message(msg: &str) -> bool {
    msg.contains("40P01") || msg.contains("deadlock detected")
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
