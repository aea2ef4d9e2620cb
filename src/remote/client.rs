//! HTTP Remote Store Client
//!
//! Talks to the remote folder API: metadata on the API host, file bodies on
//! the content host. Authentication is a caller-supplied bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info};

use super::errors::RemoteError;
use super::types::{FileMetadata, FolderMetadata};
use super::{AccessRoot, AccessToken, FolderFetch, RemoteStore};

/// Default API host for metadata and file operations
pub const DEFAULT_API_URL: &str = "https://api.dropbox.com";

/// Default content host for downloads and uploads
pub const DEFAULT_CONTENT_URL: &str = "https://api-content.dropbox.com";

/// Header carrying file metadata on content downloads
const METADATA_HEADER: &str = "x-dropbox-metadata";

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote store client for making authenticated requests
#[derive(Clone)]
pub struct HttpRemote {
    /// HTTP client for making requests
    http_client: Client,
    /// Base URL for metadata and fileops calls
    api_url: String,
    /// Base URL for content calls
    content_url: String,
    root: AccessRoot,
}

impl HttpRemote {
    /// Create a client against the given API and content hosts
    pub fn new(
        api_url: impl Into<String>,
        content_url: impl Into<String>,
        root: AccessRoot,
    ) -> Result<Self, RemoteError> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http_client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            content_url: content_url.into().trim_end_matches('/').to_string(),
            root,
        })
    }

    /// Client for the public hosts
    pub fn with_defaults(root: AccessRoot) -> Result<Self, RemoteError> {
        Self::new(DEFAULT_API_URL, DEFAULT_CONTENT_URL, root)
    }

    pub fn root(&self) -> AccessRoot {
        self.root
    }

    /// `{base}/1/{endpoint}/{root}/{folder}[/{file}]` with each path segment encoded
    fn url(&self, base: &str, endpoint: &str, folder: &str, file_name: Option<&str>) -> String {
        let mut url = format!("{}/1/{}/{}", base, endpoint, self.root.as_str());
        let segments = folder
            .split('/')
            .chain(file_name.into_iter().flat_map(|name| name.split('/')))
            .filter(|segment| !segment.is_empty());
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    /// Path of a file relative to the access root, as fileops expect it
    fn fileops_path(folder: &str, file_name: &str) -> String {
        let folder = folder.trim_matches('/');
        if folder.is_empty() {
            format!("/{}", file_name)
        } else {
            format!("/{}/{}", folder, file_name)
        }
    }

    fn authorized(&self, request: RequestBuilder, token: &AccessToken) -> RequestBuilder {
        request.bearer_auth(token.secret())
    }

    /// Turn a non-success status into the matching RemoteError
    async fn check(response: Response) -> Result<Response, RemoteError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status, &body))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn fetch_folder_metadata(
        &self,
        token: &AccessToken,
        folder: &str,
        prior_hash: Option<&str>,
    ) -> Result<FolderFetch, RemoteError> {
        let url = self.url(&self.api_url, "metadata", folder, None);
        debug!(folder = folder, hash = ?prior_hash, "Requesting folder listing");

        let mut request = self
            .authorized(self.http_client.get(&url), token)
            .query(&[("list", "true")]);
        if let Some(hash) = prior_hash {
            request = request.query(&[("hash", hash)]);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(folder = folder, "Folder listing not modified");
            return Ok(FolderFetch::NotModified);
        }

        let metadata: FolderMetadata = Self::check(response).await?.json().await?;
        debug!(
            folder = folder,
            entries = metadata.contents.len(),
            "Fetched folder listing"
        );
        Ok(FolderFetch::Modified(metadata))
    }

    async fn fetch_file_metadata(
        &self,
        token: &AccessToken,
        folder: &str,
        file_name: &str,
    ) -> Result<FileMetadata, RemoteError> {
        let url = self.url(&self.api_url, "metadata", folder, Some(file_name));
        debug!(file = file_name, "Requesting file metadata");

        let response = self
            .authorized(self.http_client.get(&url), token)
            .query(&[("list", "false")])
            .send()
            .await?;

        let metadata: FileMetadata = Self::check(response).await?.json().await?;
        if metadata.is_deleted {
            return Err(RemoteError::NotFound(metadata.path));
        }
        Ok(metadata)
    }

    async fn fetch_file_content(
        &self,
        token: &AccessToken,
        folder: &str,
        file_name: &str,
    ) -> Result<(FileMetadata, Vec<u8>), RemoteError> {
        let url = self.url(&self.content_url, "files", folder, Some(file_name));
        debug!(file = file_name, url = %url, "Downloading file");

        let response = self
            .authorized(self.http_client.get(&url), token)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let header = response
            .headers()
            .get(METADATA_HEADER)
            .ok_or_else(|| {
                RemoteError::InvalidResponse(format!("missing {} header", METADATA_HEADER))
            })?
            .to_str()
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let metadata: FileMetadata = serde_json::from_str(header)?;

        let bytes = response.bytes().await?;

        info!(file = file_name, rev = %metadata.rev, size = bytes.len(), "Downloaded file");
        Ok((metadata, bytes.to_vec()))
    }

    async fn put_file_content(
        &self,
        token: &AccessToken,
        folder: &str,
        file_name: &str,
        data: &[u8],
        parent_rev: Option<&str>,
    ) -> Result<FileMetadata, RemoteError> {
        let url = self.url(&self.content_url, "files_put", folder, Some(file_name));

        info!(
            file = file_name,
            size = data.len(),
            parent_rev = ?parent_rev,
            "Uploading file"
        );

        let mut request = self
            .authorized(self.http_client.put(&url), token)
            .body(data.to_vec());
        if let Some(rev) = parent_rev {
            request = request.query(&[("parent_rev", rev)]);
        }

        let response = request.send().await?;
        let metadata: FileMetadata = Self::check(response).await?.json().await?;

        info!(file = file_name, rev = %metadata.rev, "File uploaded");
        Ok(metadata)
    }

    async fn rename_file(
        &self,
        token: &AccessToken,
        folder: &str,
        from_name: &str,
        to_name: &str,
    ) -> Result<(), RemoteError> {
        let url = format!("{}/1/fileops/move", self.api_url);
        let from_path = Self::fileops_path(folder, from_name);
        let to_path = Self::fileops_path(folder, to_name);

        info!(from = %from_path, to = %to_path, "Moving file");

        let response = self
            .authorized(self.http_client.post(&url), token)
            .form(&[
                ("root", self.root.as_str()),
                ("from_path", from_path.as_str()),
                ("to_path", to_path.as_str()),
            ])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_file(
        &self,
        token: &AccessToken,
        folder: &str,
        file_name: &str,
    ) -> Result<(), RemoteError> {
        let url = format!("{}/1/fileops/delete", self.api_url);
        let path = Self::fileops_path(folder, file_name);

        info!(path = %path, "Deleting file");

        let response = self
            .authorized(self.http_client.post(&url), token)
            .form(&[("root", self.root.as_str()), ("path", path.as_str())])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
