//! In-process remote store for tests, with per-operation call counters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Map;

use super::errors::RemoteError;
use super::types::{EntryMetadata, FileMetadata, FolderMetadata};
use super::{AccessToken, FolderFetch, RemoteStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub folder_metadata: usize,
    pub file_metadata: usize,
    pub file_content: usize,
    pub put: usize,
    pub rename: usize,
    pub delete: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.folder_metadata
            + self.file_metadata
            + self.file_content
            + self.put
            + self.rename
            + self.delete
    }
}

#[derive(Debug, Clone)]
struct MockFile {
    rev: String,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    files: BTreeMap<String, MockFile>,
    /// Bumped on every change; the folder hash is derived from it
    generation: u64,
    next_rev: u64,
    /// When set, every call fails with this error
    failure: Option<RemoteError>,
    /// When set, content fetches alone fail with this error
    content_failure: Option<RemoteError>,
}

impl MockState {
    fn folder_hash(&self) -> String {
        format!("h{}", self.generation)
    }

    fn fresh_rev(&mut self) -> String {
        self.next_rev += 1;
        format!("auto{}", self.next_rev)
    }
}

type Hook = Box<dyn FnOnce() + Send>;

pub struct MockRemote {
    /// Folder the mock serves; calls for any other folder fail
    folder: String,
    state: Mutex<MockState>,
    /// Runs once inside the next content fetch, before it answers
    content_hook: Mutex<Option<Hook>>,
    folder_metadata_calls: AtomicUsize,
    file_metadata_calls: AtomicUsize,
    file_content_calls: AtomicUsize,
    put_calls: AtomicUsize,
    rename_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MockRemote {
    pub fn new(folder: &str) -> Self {
        Self {
            folder: folder.trim_matches('/').to_string(),
            state: Mutex::new(MockState::default()),
            content_hook: Mutex::new(None),
            folder_metadata_calls: AtomicUsize::new(0),
            file_metadata_calls: AtomicUsize::new(0),
            file_content_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            rename_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Create or replace a file as if another client had written it
    pub fn set_file(&self, name: &str, rev: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.files.insert(
            name.to_string(),
            MockFile {
                rev: rev.to_string(),
                data: data.to_vec(),
            },
        );
        state.generation += 1;
    }

    pub fn with_file(self, name: &str, rev: &str, data: &[u8]) -> Self {
        self.set_file(name, rev, data);
        self
    }

    pub fn remove(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.files.remove(name);
        state.generation += 1;
    }

    pub fn rev_of(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(name).map(|f| f.rev.clone())
    }

    pub fn data_of(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(name).map(|f| f.data.clone())
    }

    /// Make every following call fail with `error` (None restores service)
    pub fn fail_with(&self, error: Option<RemoteError>) {
        self.state.lock().unwrap().failure = error;
    }

    /// Make content fetches fail with `error`; other calls are unaffected
    pub fn fail_content_with(&self, error: Option<RemoteError>) {
        self.state.lock().unwrap().content_failure = error;
    }

    /// Run `hook` in the middle of the next content fetch, as if another
    /// task acted while the download was in flight
    pub fn on_next_content_fetch(&self, hook: impl FnOnce() + Send + 'static) {
        *self.content_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            folder_metadata: self.folder_metadata_calls.load(Ordering::SeqCst),
            file_metadata: self.file_metadata_calls.load(Ordering::SeqCst),
            file_content: self.file_content_calls.load(Ordering::SeqCst),
            put: self.put_calls.load(Ordering::SeqCst),
            rename: self.rename_calls.load(Ordering::SeqCst),
            delete: self.delete_calls.load(Ordering::SeqCst),
        }
    }

    pub fn reset_calls(&self) {
        for counter in [
            &self.folder_metadata_calls,
            &self.file_metadata_calls,
            &self.file_content_calls,
            &self.put_calls,
            &self.rename_calls,
            &self.delete_calls,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    fn path(&self, name: &str) -> String {
        if self.folder.is_empty() {
            format!("/{}", name)
        } else {
            format!("/{}/{}", self.folder, name)
        }
    }

    fn metadata(&self, name: &str, file: &MockFile) -> FileMetadata {
        FileMetadata::new(self.path(name), file.rev.clone(), file.data.len() as u64)
    }

    /// Common preamble: count the call, apply injected failures, check the folder
    fn enter(&self, counter: &AtomicUsize, folder: &str) -> Result<(), RemoteError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.state.lock().unwrap().failure.clone() {
            return Err(error);
        }
        if folder.trim_matches('/') != self.folder {
            return Err(RemoteError::NotFound(format!("/{}", folder.trim_matches('/'))));
        }
        Ok(())
    }
}

impl fmt::Debug for MockRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRemote")
            .field("folder", &self.folder)
            .field("state", &self.state)
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn fetch_folder_metadata(
        &self,
        _token: &AccessToken,
        folder: &str,
        prior_hash: Option<&str>,
    ) -> Result<FolderFetch, RemoteError> {
        self.enter(&self.folder_metadata_calls, folder)?;
        let state = self.state.lock().unwrap();
        let hash = state.folder_hash();
        if prior_hash == Some(hash.as_str()) {
            return Ok(FolderFetch::NotModified);
        }

        let contents = state
            .files
            .iter()
            .map(|(name, file)| EntryMetadata {
                path: self.path(name),
                rev: Some(file.rev.clone()),
                is_dir: false,
                extra: Map::new(),
            })
            .collect();

        Ok(FolderFetch::Modified(FolderMetadata {
            path: format!("/{}", self.folder),
            hash: Some(hash),
            contents,
            extra: Map::new(),
        }))
    }

    async fn fetch_file_metadata(
        &self,
        _token: &AccessToken,
        folder: &str,
        file_name: &str,
    ) -> Result<FileMetadata, RemoteError> {
        self.enter(&self.file_metadata_calls, folder)?;
        let state = self.state.lock().unwrap();
        state
            .files
            .get(file_name)
            .map(|file| self.metadata(file_name, file))
            .ok_or_else(|| RemoteError::NotFound(self.path(file_name)))
    }

    async fn fetch_file_content(
        &self,
        _token: &AccessToken,
        folder: &str,
        file_name: &str,
    ) -> Result<(FileMetadata, Vec<u8>), RemoteError> {
        self.enter(&self.file_content_calls, folder)?;
        let hook = self.content_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }

        let state = self.state.lock().unwrap();
        if let Some(error) = state.content_failure.clone() {
            return Err(error);
        }
        state
            .files
            .get(file_name)
            .map(|file| (self.metadata(file_name, file), file.data.clone()))
            .ok_or_else(|| RemoteError::NotFound(self.path(file_name)))
    }

    async fn put_file_content(
        &self,
        _token: &AccessToken,
        folder: &str,
        file_name: &str,
        data: &[u8],
        parent_rev: Option<&str>,
    ) -> Result<FileMetadata, RemoteError> {
        self.enter(&self.put_calls, folder)?;
        let mut state = self.state.lock().unwrap();
        let current = state.files.get(file_name).map(|f| f.rev.clone());
        if let (Some(current), Some(parent)) = (current.as_deref(), parent_rev) {
            if current != parent {
                return Err(RemoteError::Conflict(format!(
                    "{} is at {}, not {}",
                    file_name, current, parent
                )));
            }
        }

        let file = MockFile {
            rev: state.fresh_rev(),
            data: data.to_vec(),
        };
        let metadata = self.metadata(file_name, &file);
        state.files.insert(file_name.to_string(), file);
        state.generation += 1;
        Ok(metadata)
    }

    async fn rename_file(
        &self,
        _token: &AccessToken,
        folder: &str,
        from_name: &str,
        to_name: &str,
    ) -> Result<(), RemoteError> {
        self.enter(&self.rename_calls, folder)?;
        let mut state = self.state.lock().unwrap();
        if state.files.contains_key(to_name) {
            return Err(RemoteError::Forbidden(format!("{} already exists", to_name)));
        }
        let file = state
            .files
            .remove(from_name)
            .ok_or_else(|| RemoteError::NotFound(self.path(from_name)))?;
        state.files.insert(to_name.to_string(), file);
        state.generation += 1;
        Ok(())
    }

    async fn delete_file(
        &self,
        _token: &AccessToken,
        folder: &str,
        file_name: &str,
    ) -> Result<(), RemoteError> {
        self.enter(&self.delete_calls, folder)?;
        let mut state = self.state.lock().unwrap();
        state
            .files
            .remove(file_name)
            .ok_or_else(|| RemoteError::NotFound(self.path(file_name)))?;
        state.generation += 1;
        Ok(())
    }
}
