use async_trait::async_trait;
use rsync_os_core::{SpooledBody, StorageError};

/// A file created in the folder store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    /// Size the store reports after upload
    pub size: i64,
}

/// The folder-store operations `DriveStorage` relies on.
#[async_trait]
pub trait FolderClient: Send + Sync {
    /// Id of the store's top-level folder.
    fn root_id(&self) -> &str;

    /// Id of the child folder `name` of `parent_id`, if any.
    async fn find_folder(&self, parent_id: &str, name: &str)
        -> Result<Option<String>, StorageError>;

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, StorageError>;

    async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        mtime: i32,
        body: &SpooledBody,
    ) -> Result<RemoteFile, StorageError>;

    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// Direct download link of a file; `None` for folders.
    async fn download_link(&self, id: &str) -> Result<Option<String>, StorageError>;
}
