pub mod coingecko;
pub mod coingecko_onchain;
pub mod config;
pub mod defillama;
pub mod dodoex_route;
pub mod geckoterminal;
pub mod http;
pub mod symbols;

pub use coingecko::CoingeckoSource;
pub use coingecko_onchain::CoingeckoOnChainSource;
pub use config::SourcesConfig;
pub use defillama::DefillamaSource;
pub use dodoex_route::DodoexRouteSource;
pub use geckoterminal::GeckoterminalSource;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Upstream request failed: {0}")]
    Http(String),

    #[error("Rate limited by upstream (429)")]
    RateLimited,

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Cache error: {0}")]
    Cache(String),
}

impl SourceError {
    /// Request status propagated back to the throttler.
    pub fn request_status(&self) -> &'static str {
        match self {
            SourceError::RateLimited => "429",
            _ => "200",
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Http(err.to_string())
    }
}

impl From<proxy_db::DatabaseError> for SourceError {
    fn from(err: proxy_db::DatabaseError) -> Self {
        SourceError::Store(err.to_string())
    }
}

impl From<proxy_redis::RedisError> for SourceError {
    fn from(err: proxy_redis::RedisError) -> Self {
        SourceError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Malformed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
