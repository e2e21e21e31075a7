//! Flat blob-store destination.
//!
//! Objects are addressed by their full cache key. Directories and symlinks
//! exist only in the metadata cache; regular files are uploaded as objects
//! carrying their name, mtime and size as user metadata.

mod client;
mod config;
mod s3;
mod storage;

pub use client::BlobClient;
pub use config::BlobConfig;
pub use s3::S3BlobClient;
pub use storage::BlobStorage;
