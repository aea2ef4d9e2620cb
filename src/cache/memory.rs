//! In-memory cache store
//!
//! Ephemeral adapter backed by Moka. Records live until removed or, when a
//! byte budget is configured, until evicted for space. Eviction only ever
//! turns a hit into a miss.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::ops::compute::Op;
use moka::sync::Cache;
use tracing::{debug, trace};

use super::errors::StoreResult;
use super::store::{CacheStore, FileRecord, Timestamp, UserFolderRecord, UserId};
use crate::remote::{FileMetadata, FolderMetadata};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FileKey {
    user_id: UserId,
    file_name: String,
}

impl FileKey {
    fn new(user_id: &UserId, file_name: &str) -> Self {
        Self {
            user_id: user_id.clone(),
            file_name: file_name.to_string(),
        }
    }
}

/// Moka-backed store for folder and file records
pub struct MemoryStore {
    /// Records are shared so that sweeping by key never copies them
    users: Cache<UserId, Arc<UserFolderRecord>>,
    files: Cache<FileKey, Arc<FileRecord>>,
    /// File lookup hit counter
    hits: AtomicU64,
    /// File lookup miss counter
    misses: AtomicU64,
}

impl MemoryStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a store whose file records are evicted once their content
    /// exceeds `max_bytes` in total
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self::build(Some(max_bytes))
    }

    fn build(max_bytes: Option<u64>) -> Self {
        let users = Cache::builder().name("dropcache_users").build();

        let mut files = Cache::builder().name("dropcache_files");
        if let Some(max_bytes) = max_bytes {
            files = files
                .weigher(|_key: &FileKey, record: &Arc<FileRecord>| {
                    u32::try_from(record.file_data.len()).unwrap_or(u32::MAX)
                })
                .max_capacity(max_bytes);
        }

        Self {
            users,
            files: files.build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// File lookup statistics as (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();
        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            users = self.users.entry_count(),
            files = self.files.entry_count(),
            bytes = self.files.weighted_size(),
            "Memory store metrics"
        );
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get_or_create_user(
        &self,
        user_id: &UserId,
        folder_name: &str,
    ) -> StoreResult<UserFolderRecord> {
        let record = self.users.get_with(user_id.clone(), || {
            trace!(user = %user_id, "Creating folder record");
            Arc::new(UserFolderRecord::new(user_id.clone(), folder_name))
        });
        Ok(record.as_ref().clone())
    }

    fn update_folder_metadata(
        &self,
        user_id: &UserId,
        timestamp: Timestamp,
        metadata: &FolderMetadata,
    ) -> StoreResult<()> {
        self.users
            .entry(user_id.clone())
            .and_compute_with(|existing| match existing {
                Some(entry) => {
                    let mut record = entry.into_value().as_ref().clone();
                    record.folder_metadata_ts = timestamp;
                    record.folder_metadata = Some(metadata.clone());
                    Op::Put(Arc::new(record))
                }
                None => Op::Nop,
            });
        Ok(())
    }

    fn touch_folder_metadata_timestamp(
        &self,
        user_id: &UserId,
        timestamp: Timestamp,
    ) -> StoreResult<()> {
        self.users
            .entry(user_id.clone())
            .and_compute_with(|existing| match existing {
                Some(entry) => {
                    let mut record = entry.into_value().as_ref().clone();
                    record.folder_metadata_ts = timestamp;
                    Op::Put(Arc::new(record))
                }
                None => Op::Nop,
            });
        Ok(())
    }

    fn get_file(&self, user_id: &UserId, file_name: &str) -> StoreResult<Option<FileRecord>> {
        match self.files.get(&FileKey::new(user_id, file_name)) {
            Some(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(user = %user_id, file = file_name, "Memory store HIT");
                Ok(Some(record.as_ref().clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(user = %user_id, file = file_name, "Memory store MISS");
                Ok(None)
            }
        }
    }

    fn put_file(
        &self,
        user_id: &UserId,
        file_name: &str,
        timestamp: Timestamp,
        metadata: &FileMetadata,
        data: &[u8],
    ) -> StoreResult<()> {
        let record = FileRecord {
            user_id: user_id.clone(),
            file_name: file_name.to_string(),
            file_metadata: metadata.clone(),
            file_metadata_ts: timestamp,
            file_data: data.to_vec(),
        };
        self.files.insert(FileKey::new(user_id, file_name), Arc::new(record));
        debug!(user = %user_id, file = file_name, rev = %metadata.rev, size = data.len(), "Cached file");
        Ok(())
    }

    fn touch_file_timestamp(
        &self,
        user_id: &UserId,
        file_name: &str,
        timestamp: Timestamp,
    ) -> StoreResult<()> {
        self.files
            .entry(FileKey::new(user_id, file_name))
            .and_compute_with(|existing| match existing {
                Some(entry) => {
                    let mut record = entry.into_value().as_ref().clone();
                    record.file_metadata_ts = timestamp;
                    Op::Put(Arc::new(record))
                }
                None => Op::Nop,
            });
        Ok(())
    }

    fn remove_file(&self, user_id: &UserId, file_name: &str) -> StoreResult<()> {
        self.files.invalidate(&FileKey::new(user_id, file_name));
        Ok(())
    }

    fn remove_user(&self, user_id: &UserId) -> StoreResult<()> {
        self.users.invalidate(user_id);

        let keys: Vec<Arc<FileKey>> = self
            .files
            .iter()
            .filter(|(key, _)| key.user_id == *user_id)
            .map(|(key, _)| key)
            .collect();
        for key in &keys {
            self.files.invalidate(key.as_ref());
        }

        debug!(user = %user_id, files = keys.len(), "Removed user from memory store");
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        // Per-key invalidation, so records inserted after this call stay visible.
        for (key, _) in self.files.iter() {
            self.files.invalidate(key.as_ref());
        }
        for (key, _) in self.users.iter() {
            self.users.invalidate(key.as_ref());
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("Cleared memory store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::contract;
    use super::*;

    #[test]
    fn test_store_contract() {
        contract::all(&MemoryStore::new());
    }

    #[test]
    fn test_hit_miss_stats() {
        let store = MemoryStore::new();
        let user = UserId::from("alice");

        assert!(store.get_file(&user, "a.txt").unwrap().is_none());
        store
            .put_file(
                &user,
                "a.txt",
                Timestamp::now(),
                &contract::file_meta("a.txt", "r1", 1),
                b"a",
            )
            .unwrap();
        assert!(store.get_file(&user, "a.txt").unwrap().is_some());

        let (hits, misses, hit_rate) = store.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
        assert!(hit_rate > 49.0 && hit_rate < 51.0);
    }

    #[test]
    fn test_user_record_keeps_original_folder() {
        let store = MemoryStore::new();
        let user = UserId::from("alice");
        store.get_or_create_user(&user, "notes").unwrap();
        let again = store.get_or_create_user(&user, "elsewhere").unwrap();
        assert_eq!(again.folder_name, "notes");
    }
}
