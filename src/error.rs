//! Crate-level error type

use crate::cache::StoreError;
use crate::remote::RemoteError;

/// Failure of a reconciled operation: either the remote or the local store
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Remote(e) if e.is_not_found())
    }

    /// Whether the application may retry the operation as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Remote(e) if e.is_retryable())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
