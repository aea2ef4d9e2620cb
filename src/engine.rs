//! Reconciliation engine
//!
//! Decides, on every read, whether a cached record can be served as-is,
//! needs a cheap revision check against the remote, or must be refetched.
//! Write paths go to the remote first and only then update or invalidate
//! the cache.
//!
//! Record freshness: a record stamped at `ts` is fresh while
//! `now - ts <= timeout`. `Timestamp::NEVER` is never fresh.
//!
//! Each operation works against the folder tracked when it started. Cache
//! writes that follow a remote call are dropped if the tracked folder changed
//! in the meantime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{CacheStore, NullStore, StoreResult, Timestamp, UserFolderRecord, UserId};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::remote::{FileMetadata, FolderFetch, FolderMetadata, RemoteError, RemoteStore};
use crate::session::Session;

/// Default freshness window for the in-memory store
pub const MEMORY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default freshness window for the SQLite store
pub const SQLITE_TIMEOUT: Duration = Duration::from_secs(60);

/// Folder tracked by the cache and how long its records stay fresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub folder_name: String,
    pub timeout: Duration,
}

impl CacheSettings {
    pub fn new(folder_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            folder_name: folder_name.into(),
            timeout,
        }
    }

    pub fn memory_default(folder_name: impl Into<String>) -> Self {
        Self::new(folder_name, MEMORY_TIMEOUT)
    }

    pub fn sqlite_default(folder_name: impl Into<String>) -> Self {
        Self::new(folder_name, SQLITE_TIMEOUT)
    }

    /// Settings for an engine that caches nothing
    pub fn null(folder_name: impl Into<String>) -> Self {
        Self::new(folder_name, Duration::ZERO)
    }
}

/// Settings plus a generation bumped on every folder change
#[derive(Debug, Clone)]
struct Tracking {
    settings: CacheSettings,
    generation: u64,
}

/// Counters for the outcome of each file read
#[derive(Debug, Default)]
struct EngineCounters {
    fresh_hits: AtomicU64,
    revalidated: AtomicU64,
    refetched: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Served from cache without a remote call
    pub fresh_hits: u64,
    /// Expired, revision unchanged, only the timestamp was renewed
    pub revalidated: u64,
    /// Expired, revision changed, content downloaded again
    pub refetched: u64,
    /// Not cached, content downloaded
    pub misses: u64,
}

/// Cache-and-reconcile logic over one `CacheStore`.
///
/// Shared by concurrent tasks behind an `Arc`. There is no per-key locking:
/// concurrent expired reads of one file may each revalidate, and the last
/// full-record write wins.
pub struct Reconciler {
    store: Arc<dyn CacheStore>,
    tracking: RwLock<Tracking>,
    clock: Arc<dyn Clock>,
    counters: EngineCounters,
}

impl Reconciler {
    pub fn new(store: Arc<dyn CacheStore>, settings: CacheSettings) -> Self {
        Self::with_clock(store, settings, Arc::new(SystemClock))
    }

    /// Engine over a `NullStore`: every read goes to the remote
    pub fn uncached(folder_name: impl Into<String>) -> Self {
        Self::new(Arc::new(NullStore::new()), CacheSettings::null(folder_name))
    }

    pub fn with_clock(
        store: Arc<dyn CacheStore>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            store = store.name(),
            folder = %settings.folder_name,
            timeout_secs = settings.timeout.as_secs_f64(),
            "Reconciler initialized"
        );
        Self {
            store,
            tracking: RwLock::new(Tracking {
                settings,
                generation: 0,
            }),
            clock,
            counters: EngineCounters::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn folder_name(&self) -> String {
        self.tracking().settings.folder_name
    }

    pub fn timeout(&self) -> Duration {
        self.tracking().settings.timeout
    }

    /// Change the freshness window. Existing records are kept and judged
    /// against the new window from now on.
    pub fn set_timeout(&self, timeout: Duration) {
        let mut tracking = self.tracking.write().unwrap_or_else(PoisonError::into_inner);
        tracking.settings.timeout = timeout;
    }

    /// Track a different folder. Every cached record is dropped, and writes
    /// from operations still running against the old folder are discarded.
    pub fn set_folder_name(&self, folder_name: impl Into<String>) -> Result<()> {
        let folder_name = folder_name.into();
        let mut tracking = self.tracking.write().unwrap_or_else(PoisonError::into_inner);
        if tracking.settings.folder_name == folder_name {
            return Ok(());
        }

        self.store.clear()?;
        info!(
            from = %tracking.settings.folder_name,
            to = %folder_name,
            "Tracked folder changed, cache cleared"
        );
        tracking.settings.folder_name = folder_name;
        tracking.generation += 1;
        Ok(())
    }

    /// Drop every cached record of one user
    pub fn forget_user(&self, user_id: &UserId) -> Result<()> {
        self.store.remove_user(user_id)?;
        Ok(())
    }

    /// Drop every cached record
    pub fn clear(&self) -> Result<()> {
        self.store.clear()?;
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            fresh_hits: self.counters.fresh_hits.load(Ordering::Relaxed),
            revalidated: self.counters.revalidated.load(Ordering::Relaxed),
            refetched: self.counters.refetched.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }

    pub fn log_metrics(&self) {
        let stats = self.stats();
        debug!(
            store = self.store.name(),
            fresh_hits = stats.fresh_hits,
            revalidated = stats.revalidated,
            refetched = stats.refetched,
            misses = stats.misses,
            "Reconciler metrics"
        );
    }

    fn tracking(&self) -> Tracking {
        self.tracking
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply a cache write unless the tracked folder changed since
    /// `generation`. The read lock is held across the write, so a folder
    /// change cannot clear the store between the check and the write.
    fn write_if_current<F>(&self, generation: u64, write: F) -> Result<()>
    where
        F: FnOnce(&dyn CacheStore) -> StoreResult<()>,
    {
        let tracking = self.tracking.read().unwrap_or_else(PoisonError::into_inner);
        if tracking.generation != generation {
            debug!("Tracked folder changed during the operation, cache write dropped");
            return Ok(());
        }
        write(self.store.as_ref())?;
        Ok(())
    }

    /// Folder record for the user, discarding one left behind for another folder
    fn user_record(&self, user_id: &UserId, folder_name: &str) -> Result<UserFolderRecord> {
        let record = self.store.get_or_create_user(user_id, folder_name)?;
        if record.folder_name == folder_name {
            return Ok(record);
        }

        warn!(
            user = %user_id,
            cached_folder = %record.folder_name,
            folder = folder_name,
            "Cached records belong to another folder, discarding them"
        );
        self.store.remove_user(user_id)?;
        Ok(self.store.get_or_create_user(user_id, folder_name)?)
    }

    /// Folder metadata, from cache while fresh and revalidated by hash after
    pub async fn folder_metadata<R>(&self, remote: &R, session: &Session) -> Result<FolderMetadata>
    where
        R: RemoteStore + ?Sized,
    {
        let tracking = self.tracking();
        self.folder_metadata_in(remote, session, &tracking).await
    }

    async fn folder_metadata_in<R>(
        &self,
        remote: &R,
        session: &Session,
        tracking: &Tracking,
    ) -> Result<FolderMetadata>
    where
        R: RemoteStore + ?Sized,
    {
        let user = &session.user_id;
        let folder = tracking.settings.folder_name.as_str();
        let record = self.user_record(user, folder)?;

        if record
            .folder_metadata_ts
            .is_fresh(self.clock.now(), tracking.settings.timeout)
        {
            if let Some(metadata) = &record.folder_metadata {
                debug!(user = %user, folder = folder, "Folder listing fresh");
                return Ok(metadata.clone());
            }
        }

        let prior_hash = record.listing_hash().map(str::to_owned);
        let fetched = remote
            .fetch_folder_metadata(&session.token, folder, prior_hash.as_deref())
            .await?;

        match (fetched, record.folder_metadata) {
            (FolderFetch::NotModified, Some(cached)) if prior_hash.is_some() => {
                debug!(user = %user, folder = folder, "Folder listing unchanged");
                self.write_if_current(tracking.generation, |store| {
                    store.touch_folder_metadata_timestamp(user, self.clock.now())
                })?;
                Ok(cached)
            }
            (FolderFetch::NotModified, _) => Err(RemoteError::InvalidResponse(format!(
                "listing of '{}' reported not modified without a prior hash",
                folder
            ))
            .into()),
            (FolderFetch::Modified(metadata), _) => {
                debug!(
                    user = %user,
                    folder = folder,
                    entries = metadata.contents.len(),
                    "Folder listing refreshed"
                );
                self.write_if_current(tracking.generation, |store| {
                    store.update_folder_metadata(user, self.clock.now(), &metadata)
                })?;
                Ok(metadata)
            }
        }
    }

    /// Names of the files in the tracked folder, relative to it
    pub async fn list_files<R>(&self, remote: &R, session: &Session) -> Result<Vec<String>>
    where
        R: RemoteStore + ?Sized,
    {
        let tracking = self.tracking();
        let metadata = self.folder_metadata_in(remote, session, &tracking).await?;
        Ok(metadata.file_names(&tracking.settings.folder_name))
    }

    /// Content of one file.
    ///
    /// With `blank_on_missing`, a file the remote does not have reads as
    /// empty instead of failing with not-found.
    pub async fn file_data<R>(
        &self,
        remote: &R,
        session: &Session,
        file_name: &str,
        blank_on_missing: bool,
    ) -> Result<Vec<u8>>
    where
        R: RemoteStore + ?Sized,
    {
        let tracking = self.tracking();
        let user = &session.user_id;
        let folder = tracking.settings.folder_name.as_str();
        self.user_record(user, folder)?;

        let Some(record) = self.store.get_file(user, file_name)? else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!(user = %user, file = file_name, "File cache MISS");
            return self
                .download(remote, session, &tracking, file_name, blank_on_missing)
                .await;
        };

        if record
            .file_metadata_ts
            .is_fresh(self.clock.now(), tracking.settings.timeout)
        {
            self.counters.fresh_hits.fetch_add(1, Ordering::Relaxed);
            debug!(user = %user, file = file_name, rev = %record.rev(), "File cache HIT (fresh)");
            return Ok(record.file_data);
        }

        let latest = match remote
            .fetch_file_metadata(&session.token, folder, file_name)
            .await
        {
            Ok(latest) => latest,
            Err(e) if e.is_not_found() => {
                return self.vanished(&tracking, user, file_name, blank_on_missing, e);
            }
            Err(e) => return Err(e.into()),
        };

        if latest.rev == record.rev() {
            self.counters.revalidated.fetch_add(1, Ordering::Relaxed);
            debug!(user = %user, file = file_name, rev = %latest.rev, "File revalidated");
            self.write_if_current(tracking.generation, |store| {
                store.touch_file_timestamp(user, file_name, self.clock.now())
            })?;
            return Ok(record.file_data);
        }

        self.counters.refetched.fetch_add(1, Ordering::Relaxed);
        debug!(
            user = %user,
            file = file_name,
            cached_rev = %record.rev(),
            rev = %latest.rev,
            "File changed remotely, refetching"
        );
        match remote
            .fetch_file_content(&session.token, folder, file_name)
            .await
        {
            Ok((metadata, data)) => {
                self.cache_content(&tracking, user, file_name, &metadata, &data)?;
                Ok(data)
            }
            Err(e) if e.is_not_found() => {
                self.vanished(&tracking, user, file_name, blank_on_missing, e)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Content fetch for a file that is not cached
    async fn download<R>(
        &self,
        remote: &R,
        session: &Session,
        tracking: &Tracking,
        file_name: &str,
        blank_on_missing: bool,
    ) -> Result<Vec<u8>>
    where
        R: RemoteStore + ?Sized,
    {
        match remote
            .fetch_file_content(&session.token, &tracking.settings.folder_name, file_name)
            .await
        {
            Ok((metadata, data)) => {
                self.cache_content(tracking, &session.user_id, file_name, &metadata, &data)?;
                Ok(data)
            }
            Err(e) if e.is_not_found() && blank_on_missing => {
                debug!(user = %session.user_id, file = file_name, "File missing remotely, reading as empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A cached file the remote no longer has
    fn vanished(
        &self,
        tracking: &Tracking,
        user: &UserId,
        file_name: &str,
        blank_on_missing: bool,
        error: RemoteError,
    ) -> Result<Vec<u8>> {
        debug!(user = %user, file = file_name, "File gone remotely, evicting");
        self.write_if_current(tracking.generation, |store| {
            store.remove_file(user, file_name)
        })?;
        if blank_on_missing {
            Ok(Vec::new())
        } else {
            Err(error.into())
        }
    }

    fn cache_content(
        &self,
        tracking: &Tracking,
        user: &UserId,
        file_name: &str,
        metadata: &FileMetadata,
        data: &[u8],
    ) -> Result<()> {
        self.write_if_current(tracking.generation, |store| {
            store.put_file(user, file_name, self.clock.now(), metadata, data)
        })
    }

    /// Write a file through to the remote.
    ///
    /// The cached revision, if any, goes along as the parent revision.
    pub async fn upload<R>(
        &self,
        remote: &R,
        session: &Session,
        file_name: &str,
        data: &[u8],
    ) -> Result<()>
    where
        R: RemoteStore + ?Sized,
    {
        let tracking = self.tracking();
        let user = &session.user_id;
        let folder = tracking.settings.folder_name.as_str();
        self.user_record(user, folder)?;

        let prior = self.store.get_file(user, file_name)?;
        let parent_rev = prior.as_ref().map(|record| record.rev().to_owned());

        let written = remote
            .put_file_content(&session.token, folder, file_name, data, parent_rev.as_deref())
            .await?;
        info!(
            user = %user,
            file = file_name,
            rev = %written.rev,
            size = data.len(),
            parent_rev = parent_rev.as_deref().unwrap_or("-"),
            "Uploaded file"
        );

        if stored_under_other_name(file_name, &written) {
            warn!(
                file = file_name,
                stored_as = %written.path,
                "Remote stored the upload under a different name"
            );
        }

        self.write_if_current(tracking.generation, |store| {
            store.touch_folder_metadata_timestamp(user, Timestamp::NEVER)?;
            if prior.is_some() {
                store.touch_file_timestamp(user, file_name, Timestamp::NEVER)?;
            }
            Ok(())
        })?;

        if prior.is_some() {
            return Ok(());
        }

        let (metadata, content) = remote
            .fetch_file_content(&session.token, folder, file_name)
            .await?;
        self.cache_content(&tracking, user, file_name, &metadata, &content)
    }

    /// Rename a file on the remote and drop both names from the cache
    pub async fn rename<R>(
        &self,
        remote: &R,
        session: &Session,
        from_name: &str,
        to_name: &str,
    ) -> Result<()>
    where
        R: RemoteStore + ?Sized,
    {
        let tracking = self.tracking();
        let user = &session.user_id;
        let folder = tracking.settings.folder_name.as_str();
        self.user_record(user, folder)?;

        remote
            .rename_file(&session.token, folder, from_name, to_name)
            .await?;
        info!(user = %user, from = from_name, to = to_name, "Moved file");

        self.write_if_current(tracking.generation, |store| {
            store.remove_file(user, from_name)?;
            store.remove_file(user, to_name)?;
            store.touch_folder_metadata_timestamp(user, Timestamp::NEVER)
        })
    }

    /// Delete a file on the remote and drop it from the cache
    pub async fn delete<R>(&self, remote: &R, session: &Session, file_name: &str) -> Result<()>
    where
        R: RemoteStore + ?Sized,
    {
        let tracking = self.tracking();
        let user = &session.user_id;
        let folder = tracking.settings.folder_name.as_str();
        self.user_record(user, folder)?;

        remote
            .delete_file(&session.token, folder, file_name)
            .await?;
        info!(user = %user, file = file_name, "Deleted file");

        self.write_if_current(tracking.generation, |store| {
            store.remove_file(user, file_name)?;
            store.touch_folder_metadata_timestamp(user, Timestamp::NEVER)
        })
    }
}

/// Whether the remote put the upload somewhere other than `file_name`, as it
/// does when it forks a conflicting copy
fn stored_under_other_name(file_name: &str, written: &FileMetadata) -> bool {
    written.base_name() != file_name.trim_matches('/').rsplit('/').next().unwrap_or(file_name)
}
