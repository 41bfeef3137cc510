//! File cache error types

use thiserror::Error;

/// Errors from attachment blob storage
#[derive(Error, Debug)]
pub enum FileCacheError {
    #[error("attachment not found: {0}")]
    NotFound(String),

    #[error("invalid attachment id: {0}")]
    InvalidId(String),

    #[error("attachment exceeds size limit of {0} bytes")]
    ExceedsLimit(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
