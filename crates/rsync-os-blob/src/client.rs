use std::collections::HashMap;

use async_trait::async_trait;
use rsync_os_core::{SpooledBody, StorageError};

/// The object-store operations `BlobStorage` relies on.
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Fail unless the configured bucket is reachable.
    async fn ensure_container(&self) -> Result<(), StorageError>;

    /// Size of the object at `key`, or `None` if it does not exist.
    async fn stat(&self, key: &str) -> Result<Option<i64>, StorageError>;

    /// Stream `body` to `key` and return the size the store reports for it.
    async fn put(
        &self,
        key: &str,
        body: &SpooledBody,
        metadata: HashMap<String, String>,
    ) -> Result<i64, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
