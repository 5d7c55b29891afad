//! Cache-related error types

use thiserror::Error;

/// Cache operation errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Deserialization error: {message}")]
    Deserialization { message: String },

    #[error("Invalid cache key: {key}")]
    InvalidKey { key: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
