mod config;
mod retry;

use std::io;
use std::net::TcpStream;

use anyhow::Context;
use clap::Parser;
use rsync_os_blob::BlobStorage;
use rsync_os_core::SyncStorage;
use rsync_os_drive::DriveStorage;
use rsync_os_protocol::{connect, split_uri, HandshakeState, ProtocolError, RsyncUri, Session};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Backend, Cli};
use retry::RetryPolicy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let uri = split_uri(&cli.source)?;

    info!("Starting rsync-os");
    info!("  Daemon: {}", uri.address);
    info!("  Module: {} (path {})", uri.module, uri.path);
    info!("  Cache: {}", cli.cache_path.display());

    let storage: Box<dyn SyncStorage> = match &cli.backend {
        Backend::S3(cfg) => Box::new(
            BlobStorage::open(
                cfg.client(),
                &uri.module,
                &uri.path,
                &cfg.s3_key_prefix,
                &cli.cache_path,
            )
            .await
            .with_context(|| format!("opening bucket {}", cfg.s3_bucket))?,
        ),
        Backend::Drive(cfg) => Box::new(
            DriveStorage::open(
                cfg.client()?,
                &cfg.drive_base,
                &uri.module,
                &uri.path,
                &cli.cache_path,
            )
            .await
            .with_context(|| format!("opening drive folder {}", cfg.drive_base))?,
        ),
    };
    info!("  Backend: {}", storage.backend_name());

    let policy = cli.retry_policy();
    info!("  Handshake attempts: {}", policy.max_attempts());

    let result = preflight(&uri, policy, storage.as_ref()).await;
    let closed = storage.close().await;
    result?;
    closed.context("committing metadata cache")?;

    info!("Shutdown complete");
    Ok(())
}

/// Bring the daemon session up and check the destination is readable.
async fn preflight(
    uri: &RsyncUri,
    policy: RetryPolicy,
    storage: &dyn SyncStorage,
) -> anyhow::Result<()> {
    let session = policy
        .run("rsync handshake", is_transient, || open_session(uri.clone()))
        .await
        .with_context(|| format!("handshake with {}", uri.address))?;

    info!(
        "Session ready: module {} seed {} remote {:?}",
        session.module(),
        session.seed(),
        session.remote_version()
    );

    let list = storage.list().await.context("listing destination")?;
    info!("Destination holds {} entries", list.len());
    if list.is_empty() {
        warn!("Destination has no root entry");
    }

    storage
        .finish_sync()
        .await
        .context("checkpointing metadata cache")?;
    Ok(())
}

async fn open_session(uri: RsyncUri) -> Result<Session<TcpStream, TcpStream>, ProtocolError> {
    tokio::task::spawn_blocking(move || connect(&uri.address, &uri.module, &uri.path))
        .await
        .map_err(|e| ProtocolError::Transport(io::Error::other(e)))?
}

/// A daemon that rejects the module will keep rejecting it.
fn is_transient(err: &ProtocolError) -> bool {
    !matches!(
        err,
        ProtocolError::HandshakeFailed {
            state: HandshakeState::AwaitingOk,
            source,
        } if source.kind() == io::ErrorKind::ConnectionRefused
    )
}
