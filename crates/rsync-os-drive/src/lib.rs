//! Hierarchical folder-store destination (Google Drive).
//!
//! Drive addresses everything by opaque file id, so every mutation first
//! resolves the parent folder's id through the metadata cache. Parents must
//! therefore be written before their children.

mod client;
mod config;
mod drive;
mod storage;
mod token_manager;

pub use client::{FolderClient, RemoteFile};
pub use config::DriveConfig;
pub use drive::{DriveClient, DriveError, DriveFile, FOLDER_MIME_TYPE};
pub use storage::DriveStorage;
pub use token_manager::{TokenManager, TokenSource};
