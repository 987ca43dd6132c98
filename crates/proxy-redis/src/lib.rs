pub mod cache;
pub mod config;
pub mod connection;
pub mod keys;
pub mod lock;
pub mod scripts;

pub use config::RedisConfig;
pub use connection::RedisConnection;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedisError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for RedisError {
    fn from(err: redis::RedisError) -> Self {
        RedisError::Command(err.to_string())
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        RedisError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RedisError>;
