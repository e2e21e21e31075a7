use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use rsync_os_core::{
    paths, read_link_target, CacheEntry, CacheSession, EntryTarget, FileList, FileMetadata,
    FileMode, SpooledBody, StorageError, SyncStorage,
};
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::client::BlobClient;
use crate::s3::S3BlobClient;

/// Rsync destination over a flat object store.
///
/// Cache layout:
/// ```text
/// <prefix>              root directory (".")
/// <prefix><dir>         directory, cache only
/// <prefix><dir>/<file>  regular file -> object "<key_prefix><cache key>"
/// <prefix><link>        symlink -> cache key of its target
/// ```
pub struct BlobStorage<C = S3BlobClient> {
    client: C,
    prefix: String,
    key_prefix: String,
    cache: Mutex<Option<CacheSession>>,
}

impl<C: BlobClient> BlobStorage<C> {
    /// Open a destination for `module`, syncing into `path` below it.
    ///
    /// Fails if the bucket cannot be reached. Seeds the root entry when the
    /// cache has none yet.
    #[instrument(skip(client, cache_path), level = "debug")]
    pub async fn open(
        client: C,
        module: &str,
        path: &str,
        key_prefix: &str,
        cache_path: impl AsRef<Path>,
    ) -> Result<Self, StorageError> {
        client.ensure_container().await?;

        let prefix = paths::sync_prefix(path);
        let key_prefix = paths::sync_prefix(key_prefix);
        let mut cache = CacheSession::open(cache_path, module).await?;

        let root_key = paths::root_key(&prefix);
        let root_object = format!("{}{}", key_prefix, root_key);
        if cache.ensure_root(&root_key, &root_object).await? {
            debug!("Seeded root entry {}", root_key);
        }

        info!(
            "Opened blob destination for module {} (prefix {:?})",
            module, prefix
        );
        Ok(Self {
            client,
            prefix,
            key_prefix,
            cache: Mutex::new(Some(cache)),
        })
    }

    fn object_key(&self, cache_key: &str) -> String {
        format!("{}{}", self.key_prefix, cache_key)
    }
}

#[async_trait]
impl<C: BlobClient> SyncStorage for BlobStorage<C> {
    fn backend_name(&self) -> &'static str {
        "blob"
    }

    #[instrument(skip(self, content), level = "debug")]
    async fn put(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
        size: i64,
        metadata: FileMetadata,
    ) -> Result<i64, StorageError> {
        let mut guard = self.cache.lock().await;
        let cache = guard.as_mut().ok_or(StorageError::Closed)?;
        let key = paths::cache_key(&self.prefix, name);
        let mode = metadata.mode;

        if mode.is_dir() {
            let entry = CacheEntry::direct(size, metadata.mtime, mode, self.object_key(&key));
            cache.put(&key, &entry).await?;
            return Ok(0);
        }

        if mode.is_lnk() {
            let target = read_link_target(content).await?;
            let target_key = paths::link_target_key(&key, &target);
            debug!("Link {} -> {}", key, target_key);
            cache
                .put(&key, &CacheEntry::link(size, metadata.mtime, mode, target_key))
                .await?;
            return Ok(size);
        }

        let body = SpooledBody::from_reader(content).await?;

        let object = self.object_key(&key);
        let user_metadata = HashMap::from([
            ("name".to_string(), name.to_string()),
            ("mtime".to_string(), metadata.mtime.to_string()),
            ("size".to_string(), size.to_string()),
        ]);
        let written = self.client.put(&object, &body, user_metadata).await?;

        cache
            .put(
                &key,
                &CacheEntry::direct(written, metadata.mtime, mode, object),
            )
            .await?;
        debug!("Put {} ({} bytes)", key, written);
        Ok(written)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, name: &str, mode: FileMode) -> Result<(), StorageError> {
        let mut guard = self.cache.lock().await;
        let cache = guard.as_mut().ok_or(StorageError::Closed)?;
        let key = paths::cache_key(&self.prefix, name);

        if mode.is_reg() {
            let object = match cache.get(&key).await? {
                Some(CacheEntry {
                    target: EntryTarget::Direct(id),
                    ..
                }) => id,
                _ => self.object_key(&key),
            };
            if self.client.stat(&object).await?.is_none() {
                warn!("No remote object {} for {}", object, name);
                return Err(StorageError::NotFound(name.to_string()));
            }
            self.client.delete(&object).await?;
            debug!("Deleted object {}", object);
        }

        cache.delete(&key).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn list(&self) -> Result<FileList, StorageError> {
        let mut guard = self.cache.lock().await;
        let cache = guard.as_mut().ok_or(StorageError::Closed)?;
        cache.list_tree(&self.prefix).await
    }

    async fn finish_sync(&self) -> Result<(), StorageError> {
        let mut guard = self.cache.lock().await;
        let cache = guard.as_mut().ok_or(StorageError::Closed)?;
        cache.checkpoint().await
    }

    async fn close(&self) -> Result<(), StorageError> {
        let cache = self.cache.lock().await.take().ok_or(StorageError::Closed)?;
        cache.commit_and_close().await?;
        info!("Closed blob destination");
        Ok(())
    }
}
