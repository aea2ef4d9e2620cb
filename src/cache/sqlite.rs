//! SQLite cache store
//!
//! Persistent adapter. Folder records live in `user_cache` keyed by user id,
//! file records in `user_data_cache` keyed by (user id, file name).
//! Timestamps are stored as microseconds since the Unix epoch and metadata
//! as JSON text.
//!
//! One connection behind a mutex serializes all calls; mutations touching
//! more than one row run in a single transaction.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, trace};

use super::errors::{StoreError, StoreResult};
use super::store::{CacheStore, FileRecord, Timestamp, UserFolderRecord, UserId};
use crate::remote::{FileMetadata, FolderMetadata};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS user_cache (
    uid                TEXT PRIMARY KEY NOT NULL,
    folder_name        TEXT NOT NULL,
    folder_metadata_ts INTEGER NOT NULL,
    folder_metadata    TEXT
);
CREATE TABLE IF NOT EXISTS user_data_cache (
    uid              TEXT NOT NULL,
    file_name        TEXT NOT NULL,
    file_metadata    TEXT NOT NULL,
    file_metadata_ts INTEGER NOT NULL,
    file_data        BLOB NOT NULL,
    PRIMARY KEY (uid, file_name)
);
";

/// Persistent store in a single SQLite database file
pub struct SqliteStore {
    conn: Mutex<Connection>,
    /// `None` for in-memory databases
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "SQLite cache store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Private database that disappears with the store
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-call leaves no partial transaction behind, so the
        // connection is still usable.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decode_timestamp(key: &str, micros: i64) -> StoreResult<Timestamp> {
        Timestamp::from_micros(micros).ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("timestamp {} out of range", micros),
        })
    }

    fn read_user(conn: &Connection, user_id: &UserId) -> StoreResult<Option<UserFolderRecord>> {
        let row = conn
            .query_row(
                "SELECT folder_name, folder_metadata_ts, folder_metadata
                 FROM user_cache WHERE uid = ?1",
                params![user_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((folder_name, ts, metadata)) = row else {
            return Ok(None);
        };

        let folder_metadata = metadata
            .map(|json| serde_json::from_str::<FolderMetadata>(&json))
            .transpose()?;

        Ok(Some(UserFolderRecord {
            user_id: user_id.clone(),
            folder_name,
            folder_metadata_ts: Self::decode_timestamp(user_id.as_str(), ts)?,
            folder_metadata,
        }))
    }
}

impl CacheStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn get_or_create_user(
        &self,
        user_id: &UserId,
        folder_name: &str,
    ) -> StoreResult<UserFolderRecord> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if let Some(record) = Self::read_user(&tx, user_id)? {
            trace!(user = %user_id, "Returning existing folder record");
            return Ok(record);
        }

        let record = UserFolderRecord::new(user_id.clone(), folder_name);
        tx.execute(
            "INSERT INTO user_cache (uid, folder_name, folder_metadata_ts, folder_metadata)
             VALUES (?1, ?2, ?3, NULL)",
            params![
                user_id.as_str(),
                folder_name,
                record.folder_metadata_ts.to_micros()
            ],
        )?;
        tx.commit()?;

        debug!(user = %user_id, folder = folder_name, "Created folder record");
        Ok(record)
    }

    fn update_folder_metadata(
        &self,
        user_id: &UserId,
        timestamp: Timestamp,
        metadata: &FolderMetadata,
    ) -> StoreResult<()> {
        let json = serde_json::to_string(metadata)?;
        self.conn().execute(
            "UPDATE user_cache SET folder_metadata_ts = ?1, folder_metadata = ?2 WHERE uid = ?3",
            params![timestamp.to_micros(), json, user_id.as_str()],
        )?;
        Ok(())
    }

    fn touch_folder_metadata_timestamp(
        &self,
        user_id: &UserId,
        timestamp: Timestamp,
    ) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE user_cache SET folder_metadata_ts = ?1 WHERE uid = ?2",
            params![timestamp.to_micros(), user_id.as_str()],
        )?;
        Ok(())
    }

    fn get_file(&self, user_id: &UserId, file_name: &str) -> StoreResult<Option<FileRecord>> {
        let row = self
            .conn()
            .query_row(
                "SELECT file_metadata, file_metadata_ts, file_data
                 FROM user_data_cache WHERE uid = ?1 AND file_name = ?2",
                params![user_id.as_str(), file_name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((metadata, ts, data)) = row else {
            trace!(user = %user_id, file = file_name, "SQLite store MISS");
            return Ok(None);
        };

        let key = format!("{}/{}", user_id, file_name);
        Ok(Some(FileRecord {
            user_id: user_id.clone(),
            file_name: file_name.to_string(),
            file_metadata: serde_json::from_str(&metadata)?,
            file_metadata_ts: Self::decode_timestamp(&key, ts)?,
            file_data: data,
        }))
    }

    fn put_file(
        &self,
        user_id: &UserId,
        file_name: &str,
        timestamp: Timestamp,
        metadata: &FileMetadata,
        data: &[u8],
    ) -> StoreResult<()> {
        let json = serde_json::to_string(metadata)?;
        self.conn().execute(
            "INSERT INTO user_data_cache (uid, file_name, file_metadata, file_metadata_ts, file_data)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (uid, file_name) DO UPDATE SET
                 file_metadata = excluded.file_metadata,
                 file_metadata_ts = excluded.file_metadata_ts,
                 file_data = excluded.file_data",
            params![user_id.as_str(), file_name, json, timestamp.to_micros(), data],
        )?;
        debug!(user = %user_id, file = file_name, rev = %metadata.rev, size = data.len(), "Cached file");
        Ok(())
    }

    fn touch_file_timestamp(
        &self,
        user_id: &UserId,
        file_name: &str,
        timestamp: Timestamp,
    ) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE user_data_cache SET file_metadata_ts = ?1 WHERE uid = ?2 AND file_name = ?3",
            params![timestamp.to_micros(), user_id.as_str(), file_name],
        )?;
        Ok(())
    }

    fn remove_file(&self, user_id: &UserId, file_name: &str) -> StoreResult<()> {
        self.conn().execute(
            "DELETE FROM user_data_cache WHERE uid = ?1 AND file_name = ?2",
            params![user_id.as_str(), file_name],
        )?;
        Ok(())
    }

    fn remove_user(&self, user_id: &UserId) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM user_cache WHERE uid = ?1",
            params![user_id.as_str()],
        )?;
        let files = tx.execute(
            "DELETE FROM user_data_cache WHERE uid = ?1",
            params![user_id.as_str()],
        )?;
        tx.commit()?;

        debug!(user = %user_id, files = files, "Removed user from SQLite store");
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM user_data_cache", [])?;
        tx.execute("DELETE FROM user_cache", [])?;
        tx.commit()?;

        debug!("Cleared SQLite store");
        Ok(())
    }
}
