//! External collaborator contracts: message cache, file cache, relays

pub mod cache;
pub mod files;
pub mod relay;

pub use cache::{CacheError, MemoryCache, MessageCache, NoopCache};
pub use files::{ByteStream, FileCache, FileCacheError, FilesystemCache};
pub use relay::{Mailer, PushRelay, RelayError};
