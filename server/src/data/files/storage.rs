//! File cache trait definition
//!
//! Stores attachment blobs named by message id. Writes consume a byte stream
//! and enforce the caller-supplied size cap while the data is flowing, so a
//! lying Content-Length cannot smuggle an oversized upload.

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::FileCacheError;

/// A chunked byte stream, as produced by an HTTP request body
pub type ByteStream<'a> = BoxStream<'a, std::io::Result<Vec<u8>>>;

#[async_trait]
pub trait FileCache: Send + Sync {
    /// Write a blob for `id`, failing with [`FileCacheError::ExceedsLimit`]
    /// the moment more than `limit` bytes arrive. Partial data is removed on
    /// failure. Returns the number of bytes written.
    async fn write(
        &self,
        id: &str,
        limit: u64,
        stream: ByteStream<'_>,
    ) -> Result<u64, FileCacheError>;

    /// Read a blob back
    async fn open(&self, id: &str) -> Result<Vec<u8>, FileCacheError>;

    /// Remove blobs. Missing ids are not an error.
    async fn remove(&self, ids: &[String]) -> Result<(), FileCacheError>;

    /// Total bytes currently stored, for the manager stats line
    async fn size(&self) -> Result<u64, FileCacheError>;
}
