//! On-disk staging for file bodies.
//!
//! The receiver hands adapters a borrowed reader, while remote clients need an
//! owned body they can stream from. Bodies are copied to a temporary file and
//! never held in memory whole.

use std::path::Path;

use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

use crate::error::StorageError;

/// A file body staged on local disk. Removed when dropped.
#[derive(Debug)]
pub struct SpooledBody {
    file: NamedTempFile,
    len: u64,
}

impl SpooledBody {
    /// Copy `content` to a fresh temporary file.
    pub async fn from_reader(
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Self, StorageError> {
        let file = NamedTempFile::new()?;
        let mut out = tokio::fs::File::from_std(file.reopen()?);
        let len = tokio::io::copy(content, &mut out).await?;
        out.flush().await?;
        out.sync_data().await?;
        debug!("Spooled {} bytes to {}", len, file.path().display());
        Ok(Self { file, len })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A new read handle positioned at the start of the body.
    pub async fn open(&self) -> Result<tokio::fs::File, StorageError> {
        Ok(tokio::fs::File::open(self.file.path()).await?)
    }

    /// Read the whole body back into memory.
    pub async fn read_all(&self) -> Result<Vec<u8>, StorageError> {
        Ok(tokio::fs::read(self.file.path()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_spool_roundtrip() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut reader: &[u8] = &data;
        let body = SpooledBody::from_reader(&mut reader).await.unwrap();
        assert_eq!(body.len(), data.len() as u64);

        let mut back = Vec::new();
        body.open().await.unwrap().read_to_end(&mut back).await.unwrap();
        assert_eq!(back, data);
        // Each handle starts from the beginning.
        assert_eq!(body.read_all().await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_spool_removed_on_drop() {
        let mut reader: &[u8] = b"";
        let body = SpooledBody::from_reader(&mut reader).await.unwrap();
        assert!(body.is_empty());
        let path = body.path().to_path_buf();
        assert!(path.exists());
        drop(body);
        assert!(!path.exists());
    }
}
