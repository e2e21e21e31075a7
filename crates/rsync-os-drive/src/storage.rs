use std::path::Path;

use async_trait::async_trait;
use rsync_os_core::{
    paths, read_link_target, CacheEntry, CacheSession, EntryTarget, FileList, FileMetadata,
    FileMode, SpooledBody, StorageError, SyncStorage,
};
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::client::FolderClient;
use crate::drive::DriveClient;

/// Rsync destination over a folder store that addresses nodes by id.
///
/// The sync root is the folder `<base>/<module>/<prefix>`; its id is stored
/// under the root cache key and every other node hangs off it.
pub struct DriveStorage<C = DriveClient> {
    client: C,
    prefix: String,
    cache: Mutex<Option<CacheSession>>,
}

impl<C: FolderClient> DriveStorage<C> {
    /// Open a destination for `module`, creating the folder path to the sync
    /// root as needed.
    #[instrument(skip(client, cache_path), level = "debug")]
    pub async fn open(
        client: C,
        base: &str,
        module: &str,
        path: &str,
        cache_path: impl AsRef<Path>,
    ) -> Result<Self, StorageError> {
        let prefix = paths::sync_prefix(path);

        let mut folder_id = client.root_id().to_string();
        let components = base
            .split('/')
            .chain(std::iter::once(module))
            .chain(prefix.split('/'))
            .filter(|c| !c.is_empty());
        for name in components {
            folder_id = match client.find_folder(&folder_id, name).await? {
                Some(id) => id,
                None => {
                    let id = client.create_folder(&folder_id, name).await?;
                    debug!("Created folder {} ({})", name, id);
                    id
                }
            };
        }

        let mut cache = CacheSession::open(cache_path, module).await?;
        cache.seed_root(&paths::root_key(&prefix), &folder_id).await?;

        info!(
            "Opened drive destination for module {} (root folder {})",
            module, folder_id
        );
        Ok(Self {
            client,
            prefix,
            cache: Mutex::new(Some(cache)),
        })
    }

    /// Remote id of the parent folder of `key`.
    async fn parent_id(cache: &mut CacheSession, key: &str) -> Result<String, StorageError> {
        let (parent, _) = paths::split_parent(key);
        match cache.resolve(&parent).await {
            Ok((id, _)) => Ok(id),
            Err(e) if e.is_not_found() => Err(StorageError::NoParent(key.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Remove the node a path is about to be replaced with. Links own no
    /// remote node and are left to be overwritten in the cache.
    async fn discard_node(
        &self,
        cache: &mut CacheSession,
        key: &str,
        existing: Option<&CacheEntry>,
    ) -> Result<(), StorageError> {
        if let Some(CacheEntry {
            target: EntryTarget::Direct(old),
            ..
        }) = existing
        {
            debug!("Replacing {} (old node {})", key, old);
            self.client.delete(old).await?;
            cache.delete(key).await?;
        }
        Ok(())
    }

    /// Download link of the file at `name`, following a symlink.
    #[instrument(skip(self), level = "debug")]
    pub async fn download_url(&self, name: &str) -> Result<String, StorageError> {
        let mut guard = self.cache.lock().await;
        let cache = guard.as_mut().ok_or(StorageError::Closed)?;
        let key = paths::cache_key(&self.prefix, name);

        let (id, entry) = cache.resolve(&key).await?;
        if entry.mode.is_dir() {
            return Err(StorageError::NotFile(name.to_string()));
        }
        self.client
            .download_link(&id)
            .await?
            .ok_or_else(|| StorageError::NotFile(name.to_string()))
    }
}

#[async_trait]
impl<C: FolderClient> SyncStorage for DriveStorage<C> {
    fn backend_name(&self) -> &'static str {
        "drive"
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
        let (_, base_name) = paths::split_parent(&key);
        let mode = metadata.mode;

        if mode.is_lnk() {
            let target = read_link_target(content).await?;
            let target_key = paths::link_target_key(&key, &target);
            debug!("Link {} -> {}", key, target_key);
            cache
                .put(&key, &CacheEntry::link(size, metadata.mtime, mode, target_key))
                .await?;
            return Ok(size);
        }

        let existing = cache.get(&key).await?;

        if mode.is_dir() {
            if let Some(CacheEntry {
                mode: cached,
                target: EntryTarget::Direct(id),
                ..
            }) = &existing
            {
                if cached.is_dir() {
                    let entry = CacheEntry::direct(size, metadata.mtime, mode, id.clone());
                    cache.put(&key, &entry).await?;
                    return Ok(0);
                }
            }
            let parent = Self::parent_id(cache, &key).await?;
            self.discard_node(cache, &key, existing.as_ref()).await?;
            let id = self.client.create_folder(&parent, &base_name).await?;
            cache
                .put(&key, &CacheEntry::direct(size, metadata.mtime, mode, id))
                .await?;
            return Ok(0);
        }

        let parent = Self::parent_id(cache, &key).await?;
        let body = SpooledBody::from_reader(content).await?;
        self.discard_node(cache, &key, existing.as_ref()).await?;

        let file = self
            .client
            .create_file(&parent, &base_name, metadata.mtime, &body)
            .await?;

        cache
            .put(
                &key,
                &CacheEntry::direct(file.size, metadata.mtime, mode, file.id),
            )
            .await?;
        debug!("Put {} ({} bytes)", key, file.size);
        Ok(file.size)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, name: &str, mode: FileMode) -> Result<(), StorageError> {
        let mut guard = self.cache.lock().await;
        let cache = guard.as_mut().ok_or(StorageError::Closed)?;
        let key = paths::cache_key(&self.prefix, name);

        if !mode.is_lnk() {
            let (id, _) = cache.resolve(&key).await?;
            self.client.delete(&id).await?;
            debug!("Deleted node {} for {}", id, key);
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
        info!("Closed drive destination");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RemoteFile;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex as StdMutex};
    use tempfile::TempDir;

    #[derive(Debug, Clone)]
    struct Node {
        parent: String,
        name: String,
        folder: bool,
    }

    #[derive(Default)]
    struct Tree {
        nodes: HashMap<String, Node>,
        next_id: u32,
        folders_created: Vec<String>,
        deletes: Vec<String>,
        fail_next_upload: bool,
    }

    #[derive(Clone, Default)]
    struct FakeDrive {
        tree: Arc<StdMutex<Tree>>,
    }

    impl FakeDrive {
        fn insert(&self, parent: &str, name: &str, folder: bool) -> String {
            let mut tree = self.tree.lock().unwrap();
            tree.next_id += 1;
            let id = format!("n{}", tree.next_id);
            tree.nodes.insert(
                id.clone(),
                Node {
                    parent: parent.to_string(),
                    name: name.to_string(),
                    folder,
                },
            );
            id
        }

        fn deletes(&self) -> Vec<String> {
            self.tree.lock().unwrap().deletes.clone()
        }

        fn folders_created(&self) -> Vec<String> {
            self.tree.lock().unwrap().folders_created.clone()
        }

        fn fail_next_upload(&self) {
            self.tree.lock().unwrap().fail_next_upload = true;
        }

        fn node_named(&self, name: &str) -> Option<Node> {
            let tree = self.tree.lock().unwrap();
            tree.nodes.values().find(|n| n.name == name).cloned()
        }

        fn is_folder(&self, id: &str) -> bool {
            let tree = self.tree.lock().unwrap();
            tree.nodes.get(id).is_some_and(|n| n.folder)
        }
    }

    #[async_trait]
    impl FolderClient for FakeDrive {
        fn root_id(&self) -> &str {
            "root"
        }

        async fn find_folder(
            &self,
            parent_id: &str,
            name: &str,
        ) -> Result<Option<String>, StorageError> {
            let tree = self.tree.lock().unwrap();
            Ok(tree
                .nodes
                .iter()
                .find(|(_, n)| n.folder && n.parent == parent_id && n.name == name)
                .map(|(id, _)| id.clone()))
        }

        async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, StorageError> {
            let id = self.insert(parent_id, name, true);
            self.tree.lock().unwrap().folders_created.push(name.to_string());
            Ok(id)
        }

        async fn create_file(
            &self,
            parent_id: &str,
            name: &str,
            _mtime: i32,
            body: &SpooledBody,
        ) -> Result<RemoteFile, StorageError> {
            {
                let mut tree = self.tree.lock().unwrap();
                if std::mem::take(&mut tree.fail_next_upload) {
                    return Err(StorageError::Backend("503 upload".into()));
                }
            }
            let id = self.insert(parent_id, name, false);
            Ok(RemoteFile {
                id,
                size: body.len() as i64,
            })
        }

        async fn delete(&self, id: &str) -> Result<(), StorageError> {
            let mut tree = self.tree.lock().unwrap();
            if tree.nodes.remove(id).is_none() {
                return Err(StorageError::Backend(format!("404 {id}")));
            }
            tree.deletes.push(id.to_string());
            Ok(())
        }

        async fn download_link(&self, id: &str) -> Result<Option<String>, StorageError> {
            let tree = self.tree.lock().unwrap();
            Ok(tree
                .nodes
                .get(id)
                .filter(|n| !n.folder)
                .map(|_| format!("https://drive.example/uc?id={id}")))
        }
    }

    const REG: FileMode = FileMode(0o100644);
    const LNK: FileMode = FileMode(0o120777);
    const DIR: FileMode = FileMode::DEFAULT_DIR;

    async fn open(drive: &FakeDrive, dir: &TempDir, path: &str) -> DriveStorage<FakeDrive> {
        DriveStorage::open(drive.clone(), "rsync-os", "debian", path, dir.path().join("cache.db"))
            .await
            .unwrap()
    }

    async fn put(
        storage: &DriveStorage<FakeDrive>,
        name: &str,
        body: &[u8],
        mode: FileMode,
    ) -> Result<i64, StorageError> {
        let mut reader = body;
        let metadata = FileMetadata::new(1_600_000_000, mode);
        storage
            .put(name, &mut reader, body.len() as i64, metadata)
            .await
    }

    fn paths_of(list: &FileList) -> Vec<String> {
        list.iter()
            .map(|f| String::from_utf8_lossy(&f.path).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_open_builds_folder_path_once() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();

        let storage = open(&drive, &dir, "/pool/main/").await;
        assert_eq!(drive.folders_created(), vec!["rsync-os", "debian", "pool", "main"]);
        assert_eq!(paths_of(&storage.list().await.unwrap()), vec!["."]);
        storage.close().await.unwrap();

        let storage = open(&drive, &dir, "/pool/main/").await;
        assert_eq!(drive.folders_created().len(), 4);
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_parents_before_children() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();
        let storage = open(&drive, &dir, "/").await;

        let err = put(&storage, "docs/readme.txt", b"hi", REG).await.unwrap_err();
        assert!(matches!(err, StorageError::NoParent(_)));
        let err = put(&storage, "docs/sub", b"", DIR).await.unwrap_err();
        assert!(matches!(err, StorageError::NoParent(_)));

        assert_eq!(put(&storage, "docs", b"", DIR).await.unwrap(), 0);
        assert_eq!(put(&storage, "docs/readme.txt", b"hi", REG).await.unwrap(), 2);
        assert_eq!(
            paths_of(&storage.list().await.unwrap()),
            vec![".", "docs", "docs/readme.txt"]
        );
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_directory_put_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();
        let storage = open(&drive, &dir, "/").await;
        let before = drive.folders_created().len();

        put(&storage, "docs", b"", DIR).await.unwrap();
        put(&storage, "docs", b"", DIR).await.unwrap();
        assert_eq!(drive.folders_created().len(), before + 1);
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_deletes_prior_node_once() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();
        let storage = open(&drive, &dir, "/").await;

        put(&storage, "a.txt", b"one", REG).await.unwrap();
        assert!(drive.deletes().is_empty());
        put(&storage, "a.txt", b"second", REG).await.unwrap();
        assert_eq!(drive.deletes().len(), 1);

        let list = storage.list().await.unwrap();
        assert_eq!(list[1].size, 6);
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_replacing_link_keeps_target() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();
        let storage = open(&drive, &dir, "/").await;

        put(&storage, "real.txt", b"data", REG).await.unwrap();
        put(&storage, "alias.txt", b"real.txt", LNK).await.unwrap();
        put(&storage, "alias.txt", b"now a file", REG).await.unwrap();

        assert!(drive.deletes().is_empty());
        assert!(storage.download_url("real.txt").await.is_ok());
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();
        let storage = open(&drive, &dir, "/").await;

        put(&storage, "docs", b"", DIR).await.unwrap();
        put(&storage, "docs/a.txt", b"a", REG).await.unwrap();
        put(&storage, "docs/link", b"a.txt", LNK).await.unwrap();

        storage.delete("docs/link", LNK).await.unwrap();
        assert!(drive.deletes().is_empty());

        storage.delete("docs/a.txt", REG).await.unwrap();
        assert_eq!(drive.deletes().len(), 1);
        storage.delete("docs", DIR).await.unwrap();
        assert_eq!(drive.deletes().len(), 2);
        assert_eq!(paths_of(&storage.list().await.unwrap()), vec!["."]);

        let err = storage.delete("docs/a.txt", REG).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(drive.deletes().len(), 2);
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_download_url() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();
        let storage = open(&drive, &dir, "/").await;

        put(&storage, "docs", b"", DIR).await.unwrap();
        put(&storage, "docs/a.txt", b"a", REG).await.unwrap();
        put(&storage, "docs/latest", b"a.txt", LNK).await.unwrap();
        put(&storage, "docs/broken", b"gone.txt", LNK).await.unwrap();

        let direct = storage.download_url("docs/a.txt").await.unwrap();
        let via_link = storage.download_url("docs/latest").await.unwrap();
        assert_eq!(direct, via_link);
        assert!(direct.starts_with("https://drive.example/"));

        assert!(matches!(
            storage.download_url("docs").await,
            Err(StorageError::NotFile(_))
        ));
        assert!(matches!(
            storage.download_url("docs/broken").await,
            Err(StorageError::TargetNotFound(_))
        ));
        assert!(matches!(
            storage.download_url("nothing").await,
            Err(StorageError::NotFound(_))
        ));
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();
        let storage = open(&drive, &dir, "/").await;
        put(&storage, "docs", b"", DIR).await.unwrap();
        storage.finish_sync().await.unwrap();
        put(&storage, "docs/a.txt", b"a", REG).await.unwrap();
        storage.close().await.unwrap();

        let storage = open(&drive, &dir, "/").await;
        assert_eq!(
            paths_of(&storage.list().await.unwrap()),
            vec![".", "docs", "docs/a.txt"]
        );
        // The cached folder id is still valid, so children can be added directly.
        put(&storage, "docs/b.txt", b"b", REG).await.unwrap();
        storage.close().await.unwrap();

        assert!(matches!(storage.list().await, Err(StorageError::Closed)));
        assert!(matches!(
            storage.download_url("docs/a.txt").await,
            Err(StorageError::Closed)
        ));
    }

    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "sender went away",
            )))
        }
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_path_usable() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();
        let storage = open(&drive, &dir, "/").await;

        put(&storage, "a.txt", b"one", REG).await.unwrap();
        drive.fail_next_upload();
        let err = put(&storage, "a.txt", b"two", REG).await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
        assert_eq!(drive.deletes().len(), 1);
        // The old node is gone remotely, so the cache must not point at it.
        assert_eq!(paths_of(&storage.list().await.unwrap()), vec!["."]);

        assert_eq!(put(&storage, "a.txt", b"three", REG).await.unwrap(), 5);
        assert_eq!(drive.deletes().len(), 1);
        storage.delete("a.txt", REG).await.unwrap();
        assert_eq!(drive.deletes().len(), 2);
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_body_keeps_old_file() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();
        let storage = open(&drive, &dir, "/").await;

        put(&storage, "a.txt", b"one", REG).await.unwrap();
        let mut reader = BrokenReader;
        let err = storage
            .put("a.txt", &mut reader, 3, FileMetadata::new(1_600_000_000, REG))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));

        assert!(drive.deletes().is_empty());
        assert!(storage.download_url("a.txt").await.is_ok());
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_directory_replaces_file() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();
        let storage = open(&drive, &dir, "/").await;

        put(&storage, "x", b"was a file", REG).await.unwrap();
        assert_eq!(put(&storage, "x", b"", DIR).await.unwrap(), 0);
        assert_eq!(drive.deletes().len(), 1);

        let list = storage.list().await.unwrap();
        assert!(list[1].mode.is_dir());

        put(&storage, "x/child", b"c", REG).await.unwrap();
        let child = drive.node_named("child").unwrap();
        assert!(drive.is_folder(&child.parent));
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_puts_all_land() {
        let dir = TempDir::new().unwrap();
        let drive = FakeDrive::default();
        let storage = open(&drive, &dir, "/").await;

        let (a, b, c, d) = tokio::join!(
            put(&storage, "a.bin", b"aaaa", REG),
            put(&storage, "b.bin", b"bb", REG),
            put(&storage, "c", b"", DIR),
            put(&storage, "d.lnk", b"a.bin", LNK),
        );
        assert_eq!(
            (a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap()),
            (4, 2, 0, 5)
        );
        assert_eq!(
            paths_of(&storage.list().await.unwrap()),
            vec![".", "a.bin", "b.bin", "c", "d.lnk"]
        );
        storage.close().await.unwrap();
    }
}
