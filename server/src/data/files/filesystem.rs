//! Filesystem-backed file cache
//!
//! One flat directory, files named by message id. The id is validated against
//! the generated-id shape before touching the filesystem, which also rules
//! out path traversal.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::error::FileCacheError;
use super::storage::{ByteStream, FileCache};
use crate::domain::message::looks_like_message_id;

#[derive(Debug, Clone)]
pub struct FilesystemCache {
    root: PathBuf,
}

impl FilesystemCache {
    /// Create the cache, ensuring the root directory exists.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, FileCacheError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn blob_path(&self, id: &str) -> Result<PathBuf, FileCacheError> {
        if !looks_like_message_id(id) {
            return Err(FileCacheError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(id))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FileCache for FilesystemCache {
    async fn write(
        &self,
        id: &str,
        limit: u64,
        mut stream: ByteStream<'_>,
    ) -> Result<u64, FileCacheError> {
        let path = self.blob_path(id)?;
        let mut file = fs::File::create(&path).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&path).await;
                    return Err(FileCacheError::Io(e));
                }
            };
            written += chunk.len() as u64;
            if written > limit {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(FileCacheError::ExceedsLimit(limit));
            }
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(FileCacheError::Io(e));
            }
        }

        file.flush().await?;
        tracing::debug!(id, size = written, "Attachment stored");
        Ok(written)
    }

    async fn open(&self, id: &str) -> Result<Vec<u8>, FileCacheError> {
        let path = self.blob_path(id)?;
        // Read directly; map ENOENT to NotFound instead of a separate
        // exists() check, which would race with eviction.
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FileCacheError::NotFound(id.to_string())
            } else {
                FileCacheError::Io(e)
            }
        })
    }

    async fn remove(&self, ids: &[String]) -> Result<(), FileCacheError> {
        for id in ids {
            let path = match self.blob_path(id) {
                Ok(path) => path,
                Err(_) => continue,
            };
            match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(id, "Attachment evicted"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(FileCacheError::Io(e)),
            }
        }
        Ok(())
    }

    async fn size(&self) -> Result<u64, FileCacheError> {
        let mut total = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            total += entry.metadata().await?.len();
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::tempdir;

    use crate::domain::message::random_message_id;

    fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream<'static> {
        stream::iter(chunks.into_iter().map(Ok)).boxed()
    }

    #[tokio::test]
    async fn test_write_and_open_round_trip() {
        let dir = tempdir().unwrap();
        let cache = FilesystemCache::new(dir.path()).await.unwrap();
        let id = random_message_id();

        let written = cache
            .write(&id, 1024, byte_stream(vec![b"hello ".to_vec(), b"world".to_vec()]))
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert_eq!(cache.open(&id).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_write_over_limit_removes_partial() {
        let dir = tempdir().unwrap();
        let cache = FilesystemCache::new(dir.path()).await.unwrap();
        let id = random_message_id();

        let result = cache
            .write(&id, 8, byte_stream(vec![vec![0u8; 6], vec![0u8; 6]]))
            .await;
        assert!(matches!(result, Err(FileCacheError::ExceedsLimit(8))));
        assert!(matches!(
            cache.open(&id).await,
            Err(FileCacheError::NotFound(_))
        ));
        assert_eq!(cache.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_exactly_at_limit() {
        let dir = tempdir().unwrap();
        let cache = FilesystemCache::new(dir.path()).await.unwrap();
        let id = random_message_id();

        let written = cache
            .write(&id, 12, byte_stream(vec![vec![1u8; 12]]))
            .await
            .unwrap();
        assert_eq!(written, 12);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let cache = FilesystemCache::new(dir.path()).await.unwrap();
        let id = random_message_id();
        cache
            .write(&id, 64, byte_stream(vec![b"data".to_vec()]))
            .await
            .unwrap();

        cache.remove(&[id.clone()]).await.unwrap();
        cache.remove(&[id.clone()]).await.unwrap();
        assert!(matches!(
            cache.open(&id).await,
            Err(FileCacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_traversal_ids() {
        let dir = tempdir().unwrap();
        let cache = FilesystemCache::new(dir.path()).await.unwrap();

        let result = cache.open("../escape").await;
        assert!(matches!(result, Err(FileCacheError::InvalidId(_))));
        let result = cache
            .write("..", 64, byte_stream(vec![b"x".to_vec()]))
            .await;
        assert!(matches!(result, Err(FileCacheError::InvalidId(_))));
    }

    #[tokio::test]
    async fn test_size_sums_blobs() {
        let dir = tempdir().unwrap();
        let cache = FilesystemCache::new(dir.path()).await.unwrap();
        cache
            .write(&random_message_id(), 64, byte_stream(vec![vec![0u8; 10]]))
            .await
            .unwrap();
        cache
            .write(&random_message_id(), 64, byte_stream(vec![vec![0u8; 5]]))
            .await
            .unwrap();
        assert_eq!(cache.size().await.unwrap(), 15);
    }
}
