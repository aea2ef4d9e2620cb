//! Cache store contract and record types
//!
//! A store holds two record families: one folder record per user and one
//! file record per (user, file name). All adapters implement `CacheStore`
//! with identical semantics; operations on missing keys are no-ops.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};

use super::errors::StoreResult;
use crate::remote::{FileMetadata, FolderMetadata};

/// Instant a record was last confirmed against the remote.
///
/// `Timestamp::NEVER` sorts before every real instant and is never fresh.
/// Real instants carry microsecond precision, the finest any store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub const NEVER: Timestamp = Timestamp(DateTime::<Utc>::MIN_UTC);

    /// Persisted form of `NEVER`
    const NEVER_MICROS: i64 = i64::MIN;

    pub fn now() -> Self {
        Self(Utc::now().trunc_subsecs(6))
    }

    pub fn is_never(&self) -> bool {
        *self == Self::NEVER
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Time elapsed between this timestamp and `now`, zero if `now` is earlier
    pub fn elapsed_at(&self, now: Timestamp) -> Duration {
        if now.0 > self.0 {
            (now.0 - self.0).to_std().unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }

    /// A record is fresh while `elapsed <= timeout`
    pub fn is_fresh(&self, now: Timestamp, timeout: Duration) -> bool {
        !self.is_never() && self.elapsed_at(now) <= timeout
    }

    /// Microseconds since the Unix epoch
    pub fn to_micros(&self) -> i64 {
        if self.is_never() {
            Self::NEVER_MICROS
        } else {
            self.0.timestamp_micros()
        }
    }

    pub fn from_micros(micros: i64) -> Option<Self> {
        if micros == Self::NEVER_MICROS {
            return Some(Self::NEVER);
        }
        DateTime::<Utc>::from_timestamp_micros(micros).map(Self)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(6))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            f.write_str("never")
        } else {
            write!(f, "{}", self.0.to_rfc3339())
        }
    }
}

/// Opaque user identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Per-user folder state
#[derive(Debug, Clone, PartialEq)]
pub struct UserFolderRecord {
    pub user_id: UserId,
    /// Folder this record was created for
    pub folder_name: String,
    /// Last successful listing retrieval
    pub folder_metadata_ts: Timestamp,
    pub folder_metadata: Option<FolderMetadata>,
}

impl UserFolderRecord {
    /// A record that forces a listing fetch on first access
    pub fn new(user_id: UserId, folder_name: impl Into<String>) -> Self {
        Self {
            user_id,
            folder_name: folder_name.into(),
            folder_metadata_ts: Timestamp::NEVER,
            folder_metadata: None,
        }
    }

    /// Listing hash to send on a conditional fetch, if one is cached
    pub fn listing_hash(&self) -> Option<&str> {
        self.folder_metadata.as_ref()?.hash.as_deref()
    }
}

/// Cached content of one file.
///
/// `file_data` is always the content of `file_metadata.rev`; the two are only
/// ever written together.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub user_id: UserId,
    pub file_name: String,
    pub file_metadata: FileMetadata,
    /// Last time the remote confirmed `file_metadata.rev`
    pub file_metadata_ts: Timestamp,
    pub file_data: Vec<u8>,
}

impl FileRecord {
    pub fn rev(&self) -> &str {
        &self.file_metadata.rev
    }
}

/// Storage contract shared by every cache adapter.
///
/// Each call is atomic for the record it addresses. Readers observe either
/// the old or the new record, never a mix of fields.
pub trait CacheStore: Send + Sync {
    /// Adapter name for logs
    fn name(&self) -> &'static str;

    /// Existing record for `user_id`, or a new one stamped `NEVER` for `folder_name`
    fn get_or_create_user(&self, user_id: &UserId, folder_name: &str)
        -> StoreResult<UserFolderRecord>;

    /// Overwrite listing and timestamp; no-op for an unknown user
    fn update_folder_metadata(
        &self,
        user_id: &UserId,
        timestamp: Timestamp,
        metadata: &FolderMetadata,
    ) -> StoreResult<()>;

    /// Overwrite only the listing timestamp; no-op for an unknown user
    fn touch_folder_metadata_timestamp(&self, user_id: &UserId, timestamp: Timestamp)
        -> StoreResult<()>;

    /// `None` is a cache miss
    fn get_file(&self, user_id: &UserId, file_name: &str) -> StoreResult<Option<FileRecord>>;

    /// Insert or overwrite the whole file record
    fn put_file(
        &self,
        user_id: &UserId,
        file_name: &str,
        timestamp: Timestamp,
        metadata: &FileMetadata,
        data: &[u8],
    ) -> StoreResult<()>;

    /// Overwrite only the file timestamp; no-op if the file is not cached
    fn touch_file_timestamp(
        &self,
        user_id: &UserId,
        file_name: &str,
        timestamp: Timestamp,
    ) -> StoreResult<()>;

    fn remove_file(&self, user_id: &UserId, file_name: &str) -> StoreResult<()>;

    /// Remove the user's folder record and all of their file records
    fn remove_user(&self, user_id: &UserId) -> StoreResult<()>;

    /// Remove every record of both families
    fn clear(&self) -> StoreResult<()>;
}

/// Contract checks run against every adapter that actually caches.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;

    pub fn file_meta(name: &str, rev: &str, len: usize) -> FileMetadata {
        FileMetadata::new(format!("/notes/{}", name), rev, len as u64)
    }

    pub fn folder_meta(hash: &str) -> FolderMetadata {
        serde_json::from_value(serde_json::json!({
            "path": "/notes",
            "hash": hash,
            "contents": [{"path": "/notes/a.txt", "rev": "r1"}]
        }))
        .unwrap()
    }

    fn at(secs: i64) -> Timestamp {
        Timestamp::from(DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap())
    }

    pub fn user_records(store: &dyn CacheStore) {
        let alice = UserId::from("alice");

        let created = store.get_or_create_user(&alice, "notes").unwrap();
        assert_eq!(created.folder_name, "notes");
        assert!(created.folder_metadata_ts.is_never());
        assert!(created.folder_metadata.is_none());

        store
            .update_folder_metadata(&alice, at(5), &folder_meta("h1"))
            .unwrap();
        let updated = store.get_or_create_user(&alice, "notes").unwrap();
        assert_eq!(updated.folder_metadata_ts, at(5));
        assert_eq!(updated.listing_hash(), Some("h1"));

        store.touch_folder_metadata_timestamp(&alice, at(9)).unwrap();
        let touched = store.get_or_create_user(&alice, "notes").unwrap();
        assert_eq!(touched.folder_metadata_ts, at(9));
        assert_eq!(touched.folder_metadata, updated.folder_metadata);

        store
            .touch_folder_metadata_timestamp(&alice, Timestamp::NEVER)
            .unwrap();
        let reset = store.get_or_create_user(&alice, "notes").unwrap();
        assert!(reset.folder_metadata_ts.is_never());
        assert_eq!(reset.listing_hash(), Some("h1"));
    }

    pub fn unknown_user_updates_are_noops(store: &dyn CacheStore) {
        let ghost = UserId::from("ghost");
        store
            .update_folder_metadata(&ghost, at(1), &folder_meta("h1"))
            .unwrap();
        store.touch_folder_metadata_timestamp(&ghost, at(2)).unwrap();

        let record = store.get_or_create_user(&ghost, "notes").unwrap();
        assert!(record.folder_metadata_ts.is_never());
        assert!(record.folder_metadata.is_none());
    }

    pub fn file_records(store: &dyn CacheStore) {
        let alice = UserId::from("alice");

        assert!(store.get_file(&alice, "a.txt").unwrap().is_none());

        store
            .put_file(&alice, "a.txt", at(0), &file_meta("a.txt", "r1", 5), b"hello")
            .unwrap();
        let record = store.get_file(&alice, "a.txt").unwrap().unwrap();
        assert_eq!(record.rev(), "r1");
        assert_eq!(record.file_data, b"hello");
        assert_eq!(record.file_metadata_ts, at(0));

        store.touch_file_timestamp(&alice, "a.txt", at(40)).unwrap();
        let touched = store.get_file(&alice, "a.txt").unwrap().unwrap();
        assert_eq!(touched.file_metadata_ts, at(40));
        assert_eq!(touched.rev(), "r1");
        assert_eq!(touched.file_data, b"hello");

        store
            .put_file(&alice, "a.txt", at(80), &file_meta("a.txt", "r2", 3), b"bye")
            .unwrap();
        let replaced = store.get_file(&alice, "a.txt").unwrap().unwrap();
        assert_eq!(replaced.rev(), "r2");
        assert_eq!(replaced.file_data, b"bye");
        assert_eq!(replaced.file_metadata_ts, at(80));

        // Missing keys are no-ops
        store.touch_file_timestamp(&alice, "nope.txt", at(1)).unwrap();
        assert!(store.get_file(&alice, "nope.txt").unwrap().is_none());
        store.remove_file(&alice, "nope.txt").unwrap();

        store.remove_file(&alice, "a.txt").unwrap();
        assert!(store.get_file(&alice, "a.txt").unwrap().is_none());

        // A wall-clock stamp reads back unchanged
        let now = Timestamp::now();
        store
            .put_file(&alice, "b.txt", now, &file_meta("b.txt", "r1", 1), b"b")
            .unwrap();
        let record = store.get_file(&alice, "b.txt").unwrap().unwrap();
        assert_eq!(record.file_metadata_ts, now);
    }

    pub fn remove_user_is_isolated(store: &dyn CacheStore) {
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        for user in [&alice, &bob] {
            store.get_or_create_user(user, "notes").unwrap();
            store
                .update_folder_metadata(user, at(1), &folder_meta("h1"))
                .unwrap();
            store
                .put_file(user, "a.txt", at(1), &file_meta("a.txt", "r1", 1), b"a")
                .unwrap();
            store
                .put_file(user, "b.txt", at(1), &file_meta("b.txt", "r1", 1), b"b")
                .unwrap();
        }

        store.remove_user(&alice).unwrap();

        assert!(store.get_file(&alice, "a.txt").unwrap().is_none());
        assert!(store.get_file(&alice, "b.txt").unwrap().is_none());
        assert!(store
            .get_or_create_user(&alice, "notes")
            .unwrap()
            .folder_metadata_ts
            .is_never());

        assert!(store.get_file(&bob, "a.txt").unwrap().is_some());
        assert!(store.get_file(&bob, "b.txt").unwrap().is_some());
        assert_eq!(
            store.get_or_create_user(&bob, "notes").unwrap().folder_metadata_ts,
            at(1)
        );

        // Removing an unknown user is a no-op
        store.remove_user(&UserId::from("ghost")).unwrap();
    }

    pub fn clear_removes_everything(store: &dyn CacheStore) {
        let alice = UserId::from("alice");
        store.get_or_create_user(&alice, "notes").unwrap();
        store
            .update_folder_metadata(&alice, at(1), &folder_meta("h1"))
            .unwrap();
        store
            .put_file(&alice, "a.txt", at(1), &file_meta("a.txt", "r1", 1), b"a")
            .unwrap();

        store.clear().unwrap();

        assert!(store.get_file(&alice, "a.txt").unwrap().is_none());
        let fresh = store.get_or_create_user(&alice, "other").unwrap();
        assert!(fresh.folder_metadata_ts.is_never());
        assert_eq!(fresh.folder_name, "other");
    }

    pub fn all(store: &dyn CacheStore) {
        user_records(store);
        store.clear().unwrap();
        unknown_user_updates_are_noops(store);
        store.clear().unwrap();
        file_records(store);
        store.clear().unwrap();
        remove_user_is_isolated(store);
        store.clear().unwrap();
        clear_removes_everything(store);
    }
}
