//! Transactional metadata cache.
//!
//! One SQLite file per sync destination, one bucket per module. Each entry maps
//! a cache key (see [`crate::paths`]) to a protobuf-encoded record. A single
//! write transaction stays open for the whole sync pass; `checkpoint` commits it
//! and opens the next one, `commit_and_close` commits and releases the handle.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::TryStreamExt;
use prost::Message;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Row};
use tracing::{debug, info, instrument, warn};

use crate::error::StorageError;
use crate::file::{sort_file_list, FileInfo, FileList, FileMode};
use crate::paths;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS buckets (
    name TEXT PRIMARY KEY NOT NULL
);
CREATE TABLE IF NOT EXISTS entries (
    bucket TEXT NOT NULL REFERENCES buckets(name),
    key BLOB NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (bucket, key)
);
";

/// Where a cached entry lives remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryTarget {
    /// Remote identifier of a regular file or directory (object key or file id)
    Direct(String),
    /// Cache key of the entry a symlink points to
    LinkTo(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub size: i64,
    pub mtime: i32,
    pub mode: FileMode,
    pub target: EntryTarget,
}

impl CacheEntry {
    pub fn direct(size: i64, mtime: i32, mode: FileMode, remote_id: impl Into<String>) -> Self {
        Self {
            size,
            mtime,
            mode,
            target: EntryTarget::Direct(remote_id.into()),
        }
    }

    pub fn link(size: i64, mtime: i32, mode: FileMode, target_key: impl Into<String>) -> Self {
        Self {
            size,
            mtime,
            mode,
            target: EntryTarget::LinkTo(target_key.into()),
        }
    }

    /// The remote identifier, if this entry is not a link.
    pub fn remote_id(&self) -> Option<&str> {
        match &self.target {
            EntryTarget::Direct(id) => Some(id),
            EntryTarget::LinkTo(_) => None,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let target = match &self.target {
            EntryTarget::Direct(id) => record::Target::RemoteId(id.as_bytes().to_vec()),
            EntryTarget::LinkTo(key) => record::Target::LinkTo(key.as_bytes().to_vec()),
        };
        record::CacheRecord {
            size: self.size,
            mtime: self.mtime,
            mode: self.mode.bits(),
            target: Some(target),
        }
        .encode_to_vec()
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<Self, StorageError> {
        let rec = record::CacheRecord::decode(bytes)?;
        let corrupt = || StorageError::CorruptEntry(key.to_string());
        let target = match rec.target.ok_or_else(corrupt)? {
            record::Target::RemoteId(id) => {
                EntryTarget::Direct(String::from_utf8(id).map_err(|_| corrupt())?)
            }
            record::Target::LinkTo(k) => {
                EntryTarget::LinkTo(String::from_utf8(k).map_err(|_| corrupt())?)
            }
        };
        Ok(Self {
            size: rec.size,
            mtime: rec.mtime,
            mode: FileMode(rec.mode),
            target,
        })
    }
}

mod record {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct CacheRecord {
        #[prost(int64, tag = "1")]
        pub size: i64,
        #[prost(int32, tag = "2")]
        pub mtime: i32,
        #[prost(uint32, tag = "3")]
        pub mode: u32,
        #[prost(oneof = "Target", tags = "4, 5")]
        pub target: Option<Target>,
    }

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Target {
        #[prost(bytes, tag = "4")]
        RemoteId(Vec<u8>),
        #[prost(bytes, tag = "5")]
        LinkTo(Vec<u8>),
    }
}

/// An open cache database bound to one bucket, holding the session transaction.
pub struct CacheSession {
    conn: SqliteConnection,
    bucket: String,
    in_tx: bool,
}

impl std::fmt::Debug for CacheSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSession")
            .field("bucket", &self.bucket)
            .field("in_tx", &self.in_tx)
            .finish()
    }
}

impl CacheSession {
    /// Open (creating if needed) the cache at `path` and start the session
    /// transaction on `bucket`.
    #[instrument(skip(path), level = "debug", fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>, bucket: &str) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let mut conn = SqliteConnection::connect_with(&options).await?;
        sqlx::raw_sql(SCHEMA).execute(&mut conn).await?;

        let mut session = Self {
            conn,
            bucket: bucket.to_string(),
            in_tx: false,
        };
        session.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO buckets (name) VALUES (?1)")
            .bind(&session.bucket)
            .execute(&mut session.conn)
            .await?;

        info!("Opened metadata cache for bucket {}", bucket);
        Ok(session)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn begin(&mut self) -> Result<(), StorageError> {
        sqlx::query("BEGIN IMMEDIATE").execute(&mut self.conn).await?;
        self.in_tx = true;
        Ok(())
    }

    async fn ensure_tx(&mut self) -> Result<(), StorageError> {
        if !self.in_tx {
            self.begin().await?;
        }
        Ok(())
    }

    /// Commit the session transaction, rolling back if the commit fails.
    async fn commit(&mut self) -> Result<(), StorageError> {
        if !self.in_tx {
            return Ok(());
        }
        self.in_tx = false;

        let commit = match sqlx::query("COMMIT").execute(&mut self.conn).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        warn!("Cache commit failed, rolling back: {}", commit);

        match sqlx::query("ROLLBACK").execute(&mut self.conn).await {
            Ok(_) => Err(StorageError::CommitFailed(commit)),
            Err(rollback) => Err(StorageError::RollbackFailed { commit, rollback }),
        }
    }

    /// Look up a single entry.
    pub async fn get(&mut self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let row = sqlx::query("SELECT value FROM entries WHERE bucket = ?1 AND key = ?2")
            .bind(&self.bucket)
            .bind(key.as_bytes())
            .fetch_optional(&mut self.conn)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: Vec<u8> = row.try_get("value")?;
        Ok(Some(CacheEntry::decode(key, &value)?))
    }

    /// Insert or replace an entry.
    pub async fn put(&mut self, key: &str, entry: &CacheEntry) -> Result<(), StorageError> {
        self.ensure_tx().await?;
        sqlx::query(
            "INSERT INTO entries (bucket, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(bucket, key) DO UPDATE SET value = excluded.value",
        )
        .bind(&self.bucket)
        .bind(key.as_bytes())
        .bind(entry.encode())
        .execute(&mut self.conn)
        .await?;
        debug!("Cached {} -> {:?}", key, entry.target);
        Ok(())
    }

    /// Remove an entry. Removing an absent key is not an error.
    pub async fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.ensure_tx().await?;
        sqlx::query("DELETE FROM entries WHERE bucket = ?1 AND key = ?2")
            .bind(&self.bucket)
            .bind(key.as_bytes())
            .execute(&mut self.conn)
            .await?;
        debug!("Uncached {}", key);
        Ok(())
    }

    /// Resolve `key` to the entry holding a remote identifier, following at
    /// most one symlink. Returns the remote id and the resolved entry.
    pub async fn resolve(&mut self, key: &str) -> Result<(String, CacheEntry), StorageError> {
        let entry = self
            .get(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        let target_key = match &entry.target {
            EntryTarget::Direct(id) => return Ok((id.clone(), entry)),
            EntryTarget::LinkTo(target_key) => target_key.clone(),
        };

        let target = self
            .get(&target_key)
            .await?
            .ok_or_else(|| StorageError::TargetNotFound(target_key.clone()))?;
        match &target.target {
            EntryTarget::Direct(id) => Ok((id.clone(), target)),
            EntryTarget::LinkTo(_) => Err(StorageError::NestedLink(key.to_string())),
        }
    }

    /// Insert a root directory entry for `remote_id` unless `key` is already
    /// cached. Returns whether an entry was written.
    pub async fn ensure_root(&mut self, key: &str, remote_id: &str) -> Result<bool, StorageError> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        let entry = CacheEntry::direct(0, unix_now(), FileMode::DEFAULT_DIR, remote_id);
        self.put(key, &entry).await?;
        Ok(true)
    }

    /// Point the root entry at `remote_id`, keeping any cached size, mtime and
    /// mode.
    pub async fn seed_root(&mut self, key: &str, remote_id: &str) -> Result<(), StorageError> {
        let entry = match self.get(key).await? {
            Some(mut existing) => {
                existing.target = EntryTarget::Direct(remote_id.to_string());
                existing
            }
            None => CacheEntry::direct(0, unix_now(), FileMode::DEFAULT_DIR, remote_id),
        };
        self.put(key, &entry).await
    }

    /// Reconstruct the tree under `prefix` from the cache.
    ///
    /// Keys are scanned in byte order from `prefix` until the first key that
    /// does not start with it. The root entry is stored under the cleaned
    /// prefix and therefore usually falls outside the scan; it is read once
    /// more directly and emitted as `"."`.
    #[instrument(skip(self), level = "debug")]
    pub async fn list_tree(&mut self, prefix: &str) -> Result<FileList, StorageError> {
        let mut list = FileList::new();
        let mut saw_root = false;

        {
            let mut rows = sqlx::query(
                "SELECT key, value FROM entries WHERE bucket = ?1 AND key >= ?2 ORDER BY key",
            )
            .bind(&self.bucket)
            .bind(prefix.as_bytes())
            .fetch(&mut self.conn);

            while let Some(row) = rows.try_next().await? {
                let key: Vec<u8> = row.try_get("key")?;
                if !key.starts_with(prefix.as_bytes()) {
                    break;
                }
                let key_str = String::from_utf8_lossy(&key).into_owned();
                let value: Vec<u8> = row.try_get("value")?;
                let entry = CacheEntry::decode(&key_str, &value)?;

                let path = key[prefix.len()..].to_vec();
                if path == b"." {
                    saw_root = true;
                }
                list.push(FileInfo {
                    path,
                    size: entry.size,
                    mtime: entry.mtime,
                    mode: entry.mode,
                });
            }
        }

        if !saw_root {
            let root_key = paths::root_key(prefix);
            match self.get(&root_key).await? {
                Some(root) => list.push(FileInfo {
                    path: b".".to_vec(),
                    size: root.size,
                    mtime: root.mtime,
                    mode: root.mode,
                }),
                None => debug!("No root entry cached under {}", root_key),
            }
        }

        sort_file_list(&mut list);
        debug!("Listed {} entries under {:?}", list.len(), prefix);
        Ok(list)
    }

    /// Commit everything so far and open a fresh transaction on the same
    /// bucket.
    #[instrument(skip(self), level = "debug", fields(bucket = %self.bucket))]
    pub async fn checkpoint(&mut self) -> Result<(), StorageError> {
        self.commit().await?;
        self.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM buckets WHERE name = ?1")
            .bind(&self.bucket)
            .fetch_optional(&mut self.conn)
            .await?
            .is_some();
        if !exists {
            return Err(StorageError::BucketMissing(self.bucket.clone()));
        }

        info!("Checkpointed metadata cache for bucket {}", self.bucket);
        Ok(())
    }

    /// Commit the session transaction and close the database. The handle is
    /// released even if the commit fails; the commit outcome wins.
    #[instrument(skip(self), level = "debug", fields(bucket = %self.bucket))]
    pub async fn commit_and_close(mut self) -> Result<(), StorageError> {
        let committed = self.commit().await;
        let closed = self.conn.close().await;

        committed?;
        closed?;
        info!("Closed metadata cache for bucket {}", self.bucket);
        Ok(())
    }
}

fn unix_now() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i32)
        .unwrap_or(0)
}
