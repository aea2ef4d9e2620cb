//! Configuration Module
//!
//! Loads cache and remote settings from `DROPCACHE_*` environment variables.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::cache::{CacheStore, MemoryStore, NullStore, SqliteStore};
use crate::engine::CacheSettings;
use crate::remote::client::{DEFAULT_API_URL, DEFAULT_CONTENT_URL};
use crate::remote::{AccessRoot, AccessToken, HttpRemote};

/// Which cache adapter backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Sqlite,
    Memory,
    /// Caching disabled
    None,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "memory" => Ok(Backend::Memory),
            "none" | "off" => Ok(Backend::None),
            other => Err(anyhow!(
                "unknown cache backend '{}' (expected sqlite, memory or none)",
                other
            )),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Sqlite => "sqlite",
            Backend::Memory => "memory",
            Backend::None => "none",
        })
    }
}

/// Runtime configuration.
///
/// Every value can be set through the environment; see `from_env`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token for remote calls
    pub token: Option<AccessToken>,
    pub user_id: String,
    /// Remote folder the cache tracks
    pub folder: String,
    /// Freshness window; `None` uses the backend's default
    pub timeout: Option<Duration>,
    pub backend: Backend,
    pub db_path: PathBuf,
    pub api_url: String,
    pub content_url: String,
    pub root: AccessRoot,
    /// Content budget for the memory backend; unbounded when `None`
    pub memory_max_bytes: Option<u64>,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Environment Variables
    /// - `DROPCACHE_TOKEN` - access token (required for remote commands)
    /// - `DROPCACHE_UID` - user id (default: `default`)
    /// - `DROPCACHE_FOLDER` - tracked folder (default: access root itself)
    /// - `DROPCACHE_TIMEOUT_SECS` - freshness window (default: per backend)
    /// - `DROPCACHE_BACKEND` - `sqlite`, `memory` or `none` (default: `sqlite`)
    /// - `DROPCACHE_DB` - SQLite file (default: user cache dir)
    /// - `DROPCACHE_API_URL` / `DROPCACHE_CONTENT_URL` - API base URLs
    /// - `DROPCACHE_ROOT` - `sandbox` or `dropbox` (default: `sandbox`)
    /// - `DROPCACHE_MEMORY_MAX_BYTES` - memory backend budget (default: unbounded)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset and empty values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let timeout = get("DROPCACHE_TIMEOUT_SECS")
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .ok_or_else(|| {
                        anyhow!("DROPCACHE_TIMEOUT_SECS must be a non-negative number, got '{}'", v)
                    })
            })
            .transpose()?;

        let memory_max_bytes = get("DROPCACHE_MEMORY_MAX_BYTES")
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .with_context(|| format!("Invalid DROPCACHE_MEMORY_MAX_BYTES '{}'", v))
            })
            .transpose()?;

        Ok(Self {
            token: get("DROPCACHE_TOKEN").map(AccessToken::new),
            user_id: get("DROPCACHE_UID").unwrap_or(defaults.user_id),
            folder: get("DROPCACHE_FOLDER").unwrap_or(defaults.folder),
            timeout,
            backend: get("DROPCACHE_BACKEND")
                .map(|v| v.parse::<Backend>())
                .transpose()?
                .unwrap_or(defaults.backend),
            db_path: get("DROPCACHE_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            api_url: get("DROPCACHE_API_URL").unwrap_or(defaults.api_url),
            content_url: get("DROPCACHE_CONTENT_URL").unwrap_or(defaults.content_url),
            root: get("DROPCACHE_ROOT")
                .map(|v| v.parse::<AccessRoot>().map_err(|e| anyhow!(e)))
                .transpose()?
                .unwrap_or(defaults.root),
            memory_max_bytes,
        })
    }

    /// The configured token, or an error naming the variable to set
    pub fn require_token(&self) -> Result<AccessToken> {
        self.token
            .clone()
            .ok_or_else(|| anyhow!("DROPCACHE_TOKEN is not set"))
    }

    /// Folder and freshness window for the configured backend
    pub fn cache_settings(&self) -> CacheSettings {
        let settings = match self.backend {
            Backend::Sqlite => CacheSettings::sqlite_default(self.folder.clone()),
            Backend::Memory => CacheSettings::memory_default(self.folder.clone()),
            Backend::None => CacheSettings::null(self.folder.clone()),
        };
        match self.timeout {
            Some(timeout) => CacheSettings { timeout, ..settings },
            None => settings,
        }
    }

    /// Open the configured cache store
    pub fn build_store(&self) -> Result<Arc<dyn CacheStore>> {
        let store: Arc<dyn CacheStore> = match self.backend {
            Backend::Sqlite => Arc::new(
                SqliteStore::open(&self.db_path)
                    .with_context(|| format!("Failed to open cache at {}", self.db_path.display()))?,
            ),
            Backend::Memory => Arc::new(match self.memory_max_bytes {
                Some(max_bytes) => MemoryStore::with_max_bytes(max_bytes),
                None => MemoryStore::new(),
            }),
            Backend::None => Arc::new(NullStore::new()),
        };
        Ok(store)
    }

    pub fn build_remote(&self) -> Result<HttpRemote> {
        HttpRemote::new(self.api_url.clone(), self.content_url.clone(), self.root)
            .context("Failed to create HTTP client")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: None,
            user_id: "default".to_string(),
            folder: String::new(),
            timeout: None,
            backend: Backend::default(),
            db_path: default_db_path(),
            api_url: DEFAULT_API_URL.to_string(),
            content_url: DEFAULT_CONTENT_URL.to_string(),
            root: AccessRoot::default(),
            memory_max_bytes: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("dropcache")
        .join("cache.db")
}
