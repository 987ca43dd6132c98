pub mod coalesce;
pub mod config;
pub mod resolver;
pub mod service;

pub use coalesce::CoalescingEngine;
pub use config::ResolverConfig;
pub use resolver::PriceResolver;
pub use service::PriceService;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Source error: {0}")]
    Source(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Cache error: {0}")]
    Cache(String),
}

impl From<proxy_sources::SourceError> for ResolverError {
    fn from(err: proxy_sources::SourceError) -> Self {
        ResolverError::Source(err.to_string())
    }
}

impl From<proxy_db::DatabaseError> for ResolverError {
    fn from(err: proxy_db::DatabaseError) -> Self {
        ResolverError::Store(err.to_string())
    }
}

impl From<proxy_redis::RedisError> for ResolverError {
    fn from(err: proxy_redis::RedisError) -> Self {
        ResolverError::Cache(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ResolverError>;
