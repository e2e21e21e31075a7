//! Google Drive API v3 client.

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, StatusCode};
use rsync_os_core::{SpooledBody, StorageError};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};

use crate::client::{FolderClient, RemoteFile};
use crate::token_manager::TokenManager;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("OAuth token unavailable: {0:#}")]
    Token(anyhow::Error),

    #[error("Google Drive API returned {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("unexpected Drive response: {0}")]
    Malformed(String),

    #[error("invalid Drive configuration: {0}")]
    Config(String),

    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DriveError> for StorageError {
    fn from(err: DriveError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// File resource fields this client asks Drive for.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Drive reports sizes as decimal strings
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub web_content_link: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }

    pub fn size(&self) -> Result<i64, DriveError> {
        match &self.size {
            Some(s) => s
                .parse()
                .map_err(|_| DriveError::Malformed(format!("size {:?} of {}", s, self.id))),
            None => Ok(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Google Drive API client.
pub struct DriveClient {
    http: Client,
    base_url: String,
    tokens: TokenManager,
}

impl DriveClient {
    pub fn new(tokens: TokenManager) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, tokens)
    }

    pub fn with_base_url(base_url: &str, tokens: TokenManager) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn token(&self) -> Result<String, DriveError> {
        self.tokens.get_valid_token().await.map_err(DriveError::Token)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }

    /// Find a non-trashed child folder by exact name.
    #[instrument(skip(self), level = "debug")]
    pub async fn find_child_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<DriveFile>, DriveError> {
        let q = format!(
            "'{}' in parents and name = '{}' and mimeType = '{}' and trashed = false",
            escape_query(parent_id),
            escape_query(name),
            FOLDER_MIME_TYPE
        );
        let response = self
            .http
            .get(self.endpoint("/drive/v3/files"))
            .bearer_auth(self.token().await?)
            .query(&[
                ("q", q.as_str()),
                ("fields", "files(id,name,mimeType)"),
                ("spaces", "drive"),
            ])
            .send()
            .await?;
        let list: FileListResponse = Self::handle_response(response).await?;
        Ok(list.files.into_iter().next())
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn create_child_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<DriveFile, DriveError> {
        let response = self
            .http
            .post(self.endpoint("/drive/v3/files"))
            .bearer_auth(self.token().await?)
            .query(&[("fields", "id,name,mimeType")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }))
            .send()
            .await?;
        let folder: DriveFile = Self::handle_response(response).await?;
        debug!("Created folder {} ({})", name, folder.id);
        Ok(folder)
    }

    /// Create a file: metadata first, then the media upload streamed from disk.
    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    pub async fn upload_file(
        &self,
        parent_id: &str,
        name: &str,
        mtime: i32,
        data: &SpooledBody,
    ) -> Result<DriveFile, DriveError> {
        let modified = chrono::DateTime::from_timestamp(i64::from(mtime), 0)
            .unwrap_or_default()
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let token = self.token().await?;

        let response = self
            .http
            .post(self.endpoint("/drive/v3/files"))
            .bearer_auth(&token)
            .query(&[("fields", "id")])
            .json(&json!({
                "name": name,
                "parents": [parent_id],
                "modifiedTime": modified,
            }))
            .send()
            .await?;
        let created: DriveFile = Self::handle_response(response).await?;

        let file = tokio::fs::File::open(data.path()).await?;
        let response = self
            .http
            .patch(self.endpoint(&format!("/upload/drive/v3/files/{}", created.id)))
            .bearer_auth(&token)
            .query(&[("uploadType", "media"), ("fields", "id,size")])
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, data.len())
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        let uploaded: DriveFile = Self::handle_response(response).await?;
        debug!("Uploaded {} ({})", name, uploaded.id);
        Ok(uploaded)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get_file(&self, file_id: &str) -> Result<DriveFile, DriveError> {
        let response = self
            .http
            .get(self.endpoint(&format!("/drive/v3/files/{}", file_id)))
            .bearer_auth(self.token().await?)
            .query(&[("fields", "id,name,mimeType,size,webContentLink")])
            .send()
            .await?;
        Self::handle_response(response).await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn delete_file(&self, file_id: &str) -> Result<(), DriveError> {
        let response = self
            .http
            .delete(self.endpoint(&format!("/drive/v3/files/{}", file_id)))
            .bearer_auth(self.token().await?)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Api { status, body });
        }
        debug!("Deleted file {}", file_id);
        Ok(())
    }
}

/// Escape a literal for use inside a single-quoted Drive query string.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl FolderClient for DriveClient {
    fn root_id(&self) -> &str {
        "root"
    }

    async fn find_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<String>, StorageError> {
        Ok(self
            .find_child_folder(parent_id, name)
            .await?
            .map(|f| f.id))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, StorageError> {
        Ok(self.create_child_folder(parent_id, name).await?.id)
    }

    async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        mtime: i32,
        body: &SpooledBody,
    ) -> Result<RemoteFile, StorageError> {
        let file = self.upload_file(parent_id, name, mtime, body).await?;
        let size = file.size()?;
        Ok(RemoteFile { id: file.id, size })
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        Ok(self.delete_file(id).await?)
    }

    async fn download_link(&self, id: &str) -> Result<Option<String>, StorageError> {
        let file = self.get_file(id).await?;
        if file.is_folder() {
            return Ok(None);
        }
        Ok(file.web_content_link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("plain"), "plain");
        assert_eq!(escape_query("it's"), "it\\'s");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_drive_file_size() {
        let file: DriveFile =
            serde_json::from_value(json!({"id": "f1", "size": "1234"})).unwrap();
        assert_eq!(file.size().unwrap(), 1234);
        assert!(!file.is_folder());

        let folder: DriveFile =
            serde_json::from_value(json!({"id": "d1", "mimeType": FOLDER_MIME_TYPE})).unwrap();
        assert_eq!(folder.size().unwrap(), 0);
        assert!(folder.is_folder());

        let bad: DriveFile = serde_json::from_value(json!({"id": "x", "size": "lots"})).unwrap();
        assert!(matches!(bad.size(), Err(DriveError::Malformed(_))));
    }
}
