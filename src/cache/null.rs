//! Null cache store
//!
//! Caches nothing: every file lookup misses and every folder record is new.
//! Used when caching is disabled.

use tracing::trace;

use super::errors::StoreResult;
use super::store::{CacheStore, FileRecord, Timestamp, UserFolderRecord, UserId};
use crate::remote::{FileMetadata, FolderMetadata};

#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

impl CacheStore for NullStore {
    fn name(&self) -> &'static str {
        "none"
    }

    fn get_or_create_user(
        &self,
        user_id: &UserId,
        folder_name: &str,
    ) -> StoreResult<UserFolderRecord> {
        Ok(UserFolderRecord::new(user_id.clone(), folder_name))
    }

    fn update_folder_metadata(
        &self,
        _user_id: &UserId,
        _timestamp: Timestamp,
        _metadata: &FolderMetadata,
    ) -> StoreResult<()> {
        Ok(())
    }

    fn touch_folder_metadata_timestamp(
        &self,
        _user_id: &UserId,
        _timestamp: Timestamp,
    ) -> StoreResult<()> {
        Ok(())
    }

    fn get_file(&self, user_id: &UserId, file_name: &str) -> StoreResult<Option<FileRecord>> {
        trace!(user = %user_id, file = file_name, "Null store MISS");
        Ok(None)
    }

    fn put_file(
        &self,
        _user_id: &UserId,
        _file_name: &str,
        _timestamp: Timestamp,
        _metadata: &FileMetadata,
        _data: &[u8],
    ) -> StoreResult<()> {
        Ok(())
    }

    fn touch_file_timestamp(
        &self,
        _user_id: &UserId,
        _file_name: &str,
        _timestamp: Timestamp,
    ) -> StoreResult<()> {
        Ok(())
    }

    fn remove_file(&self, _user_id: &UserId, _file_name: &str) -> StoreResult<()> {
        Ok(())
    }

    fn remove_user(&self, _user_id: &UserId) -> StoreResult<()> {
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::contract;
    use super::*;

    #[test]
    fn test_never_retains_anything() {
        let store = NullStore::new();
        let user = UserId::from("alice");

        store
            .update_folder_metadata(&user, Timestamp::now(), &contract::folder_meta("h1"))
            .unwrap();
        let record = store.get_or_create_user(&user, "notes").unwrap();
        assert!(record.folder_metadata_ts.is_never());
        assert!(record.folder_metadata.is_none());
        assert_eq!(record.folder_name, "notes");

        store
            .put_file(
                &user,
                "a.txt",
                Timestamp::now(),
                &contract::file_meta("a.txt", "r1", 1),
                b"a",
            )
            .unwrap();
        assert!(store.get_file(&user, "a.txt").unwrap().is_none());
    }
}
