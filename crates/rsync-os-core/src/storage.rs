use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::StorageError;
use crate::file::{FileList, FileMetadata, FileMode};

/// Destination contract driven by the rsync receiver.
///
/// Implementations emulate a filesystem over a remote store by keeping a local
/// metadata cache. Every method is serialized per instance; once `close` has
/// run, every method fails with `StorageError::Closed`.
#[async_trait]
pub trait SyncStorage: Send + Sync {
    /// Short backend identifier used in logs.
    fn backend_name(&self) -> &'static str;

    /// Create or replace the entry at `name` (relative to the sync root).
    ///
    /// # Arguments
    /// * `name` - Path relative to the sync root
    /// * `content` - File bytes; for symlinks the link target; ignored for directories
    /// * `size` - Size announced by the sender
    /// * `metadata` - Modification time and mode
    ///
    /// Returns the size actually written (0 for directories).
    async fn put(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
        size: i64,
        metadata: FileMetadata,
    ) -> Result<i64, StorageError>;

    /// Remove the entry at `name`. Symlinks only touch the cache.
    async fn delete(&self, name: &str, mode: FileMode) -> Result<(), StorageError>;

    /// The tree known to the cache, relative to the sync root, sorted by path.
    async fn list(&self) -> Result<FileList, StorageError>;

    /// Make everything written so far durable and start a fresh transaction.
    async fn finish_sync(&self) -> Result<(), StorageError>;

    /// Commit outstanding changes and release the cache.
    async fn close(&self) -> Result<(), StorageError>;
}

/// Read a symlink body: the whole stream is the target path.
pub async fn read_link_target(
    content: &mut (dyn AsyncRead + Send + Unpin),
) -> Result<String, StorageError> {
    let mut buf = Vec::new();
    content.read_to_end(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| {
        StorageError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}
