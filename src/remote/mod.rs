//! Remote folder store
//!
//! The `RemoteStore` trait is everything the reconciler needs from the
//! remote side. `HttpRemote` implements it over the store's REST API.

pub mod client;
pub mod errors;
#[cfg(test)]
pub(crate) mod mock;
pub mod types;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

pub use client::HttpRemote;
pub use errors::RemoteError;
pub use types::*;

/// Bearer credential for remote calls.
///
/// Obtaining it (OAuth) is the application's job. `Debug` never prints the
/// secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Which root the folder path is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessRoot {
    /// App folder access
    #[default]
    Sandbox,
    /// Full account access
    Full,
}

impl AccessRoot {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRoot::Sandbox => "sandbox",
            AccessRoot::Full => "dropbox",
        }
    }
}

impl FromStr for AccessRoot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sandbox" => Ok(AccessRoot::Sandbox),
            "dropbox" | "full" => Ok(AccessRoot::Full),
            other => Err(format!(
                "unknown access root '{}' (expected 'sandbox' or 'dropbox')",
                other
            )),
        }
    }
}

/// Outcome of a conditional folder metadata fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FolderFetch {
    /// The listing hash matched; the caller's copy is current
    NotModified,
    Modified(FolderMetadata),
}

/// Operations the reconciler consumes from the remote store.
///
/// `folder` is the tracked folder path; file names are relative to it.
/// Implementations report a missing file as `RemoteError::NotFound` and
/// everything else as the other `RemoteError` variants.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the folder listing, conditional on `prior_hash` when given
    async fn fetch_folder_metadata(
        &self,
        token: &AccessToken,
        folder: &str,
        prior_hash: Option<&str>,
    ) -> Result<FolderFetch, RemoteError>;

    /// Fetch metadata for one file without its content
    async fn fetch_file_metadata(
        &self,
        token: &AccessToken,
        folder: &str,
        file_name: &str,
    ) -> Result<FileMetadata, RemoteError>;

    /// Fetch a file's content together with the metadata of that version
    async fn fetch_file_content(
        &self,
        token: &AccessToken,
        folder: &str,
        file_name: &str,
    ) -> Result<(FileMetadata, Vec<u8>), RemoteError>;

    /// Write a file. `parent_rev` is the revision the caller last saw; the
    /// remote may reject or fork the write if it no longer matches.
    async fn put_file_content(
        &self,
        token: &AccessToken,
        folder: &str,
        file_name: &str,
        data: &[u8],
        parent_rev: Option<&str>,
    ) -> Result<FileMetadata, RemoteError>;

    async fn rename_file(
        &self,
        token: &AccessToken,
        folder: &str,
        from_name: &str,
        to_name: &str,
    ) -> Result<(), RemoteError>;

    async fn delete_file(
        &self,
        token: &AccessToken,
        folder: &str,
        file_name: &str,
    ) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_root_parse() {
        assert_eq!("sandbox".parse::<AccessRoot>(), Ok(AccessRoot::Sandbox));
        assert_eq!("dropbox".parse::<AccessRoot>(), Ok(AccessRoot::Full));
        assert_eq!(AccessRoot::Full.as_str(), "dropbox");
        assert!("app".parse::<AccessRoot>().is_err());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AccessToken::new("sl.very-secret");
        assert_eq!(format!("{:?}", token), "AccessToken(***)");
        assert_eq!(token.secret(), "sl.very-secret");
    }
}
