//! Message cache error types

use thiserror::Error;

/// Errors from message cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache backend error: {0}")]
    Backend(String),
}
