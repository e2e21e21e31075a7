use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use rsync_os_core::{SpooledBody, StorageError};
use tracing::{debug, instrument};

use crate::client::BlobClient;

/// `BlobClient` over any S3-compatible endpoint (AWS, R2, MinIO).
#[derive(Clone)]
pub struct S3BlobClient {
    s3_client: S3Client,
    bucket_name: String,
}

impl S3BlobClient {
    pub fn new(s3_client: S3Client, bucket_name: String) -> Self {
        Self {
            s3_client,
            bucket_name,
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }
}

#[async_trait]
impl BlobClient for S3BlobClient {
    #[instrument(skip(self), level = "debug", fields(bucket = %self.bucket_name))]
    async fn ensure_container(&self) -> Result<(), StorageError> {
        self.s3_client
            .head_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!(
                    "S3 bucket {} unreachable: {}",
                    self.bucket_name,
                    e.into_service_error()
                ))
            })?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn stat(&self, key: &str) -> Result<Option<i64>, StorageError> {
        let result = self
            .s3_client
            .head_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(output.content_length().unwrap_or(0))),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    return Ok(None);
                }
                Err(StorageError::Backend(format!(
                    "S3 head_object error: {}",
                    service_error
                )))
            }
        }
    }

    #[instrument(skip(self, body, metadata), level = "debug", fields(len = body.len()))]
    async fn put(
        &self,
        key: &str,
        body: &SpooledBody,
        metadata: HashMap<String, String>,
    ) -> Result<i64, StorageError> {
        let stream = ByteStream::from_path(body.path())
            .await
            .map_err(|e| StorageError::Backend(format!("S3 body for {}: {}", key, e)))?;

        self.s3_client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .set_metadata(Some(metadata))
            .content_length(body.len() as i64)
            .body(stream)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("S3 put_object error: {}", e)))?;

        let size = self.stat(key).await?.ok_or_else(|| {
            StorageError::Backend(format!("S3 object {} missing right after upload", key))
        })?;
        debug!("Uploaded {} ({} bytes)", key, size);
        Ok(size)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.s3_client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("S3 delete_object error: {}", e)))?;
        Ok(())
    }
}
