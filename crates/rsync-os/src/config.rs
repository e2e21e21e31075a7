use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rsync_os_blob::BlobConfig;
use rsync_os_drive::DriveConfig;

use crate::retry::RetryPolicy;

/// Mirror an rsync daemon module into object or folder storage.
#[derive(Parser, Debug)]
#[command(name = "rsync-os", version)]
pub struct Cli {
    /// Source, as rsync://host[:port]/module/path
    pub source: String,

    /// SQLite metadata cache for this destination
    #[arg(long, default_value = "rsync-os.db", env = "RSYNC_OS_CACHE")]
    pub cache_path: PathBuf,

    /// Attempts at connecting and completing the handshake
    #[arg(long, default_value_t = 3, env = "RSYNC_OS_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Delay before the first retry, doubled on each further attempt
    #[arg(long, default_value_t = 500, env = "RSYNC_OS_RETRY_BASE_MS")]
    pub retry_base_ms: u64,

    /// Upper bound for a single retry delay
    #[arg(long, default_value_t = 30_000, env = "RSYNC_OS_RETRY_MAX_MS")]
    pub retry_max_ms: u64,

    #[command(subcommand)]
    pub backend: Backend,
}

#[derive(Subcommand, Debug)]
pub enum Backend {
    /// S3-compatible object storage
    S3(BlobConfig),
    /// Google Drive
    Drive(DriveConfig),
}

impl Cli {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.retry_max_ms),
        )
    }
}
