//! Application-facing folder client
//!
//! Binds one session to a shared engine and remote store, so request
//! handlers can call file operations without threading both through.

use std::sync::Arc;

use crate::engine::Reconciler;
use crate::error::Result;
use crate::remote::RemoteStore;
use crate::session::Session;

#[derive(Clone)]
pub struct FolderClient {
    engine: Arc<Reconciler>,
    remote: Arc<dyn RemoteStore>,
    session: Session,
}

impl FolderClient {
    pub fn new(engine: Arc<Reconciler>, remote: Arc<dyn RemoteStore>, session: Session) -> Self {
        Self {
            engine,
            remote,
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn engine(&self) -> &Arc<Reconciler> {
        &self.engine
    }

    /// File names in the tracked folder
    pub async fn list_files(&self) -> Result<Vec<String>> {
        self.engine
            .list_files(self.remote.as_ref(), &self.session)
            .await
    }

    /// Content of `file_name`; empty instead of not-found when
    /// `blank_on_missing` is set
    pub async fn get_file_data(&self, file_name: &str, blank_on_missing: bool) -> Result<Vec<u8>> {
        self.engine
            .file_data(self.remote.as_ref(), &self.session, file_name, blank_on_missing)
            .await
    }

    pub async fn upload_file_data(&self, file_name: &str, data: &[u8]) -> Result<()> {
        self.engine
            .upload(self.remote.as_ref(), &self.session, file_name, data)
            .await
    }

    pub async fn move_file(&self, file_name: &str, new_file_name: &str) -> Result<()> {
        self.engine
            .rename(self.remote.as_ref(), &self.session, file_name, new_file_name)
            .await
    }

    pub async fn delete_file(&self, file_name: &str) -> Result<()> {
        self.engine
            .delete(self.remote.as_ref(), &self.session, file_name)
            .await
    }
}
