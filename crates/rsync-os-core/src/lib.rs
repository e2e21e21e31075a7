//! Core traits and types for rsync-os storage backends.
//!
//! This crate defines the pieces shared by every destination backend:
//! - `SyncStorage`: the Put/Delete/List/FinishSync/Close contract the receiver drives
//! - `CacheSession`: the transactional metadata cache that emulates a filesystem tree
//! - `FileMode`, `FileInfo`, `FileMetadata`: the rsync-side view of an entry
//! - `paths`: cache-key normalization
//! - `SpooledBody`: file bodies staged on disk before upload

mod cache;
mod error;
mod file;
pub mod paths;
mod spool;
mod storage;

pub use cache::{CacheEntry, CacheSession, EntryTarget};
pub use error::StorageError;
pub use file::{sort_file_list, FileInfo, FileList, FileMetadata, FileMode};
pub use spool::SpooledBody;
pub use storage::{read_link_target, SyncStorage};
