//! dropcache - revision-checked local cache for a remote per-user folder
//!
//! Reads are served from a local store while fresh, revalidated by revision
//! once expired and refetched only when the remote revision changed. Writes
//! go to the remote first and then update or invalidate the store.

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod remote;
pub mod session;

pub use cache::{CacheStore, MemoryStore, NullStore, SqliteStore, Timestamp, UserId};
pub use client::FolderClient;
pub use config::{Backend, Config};
pub use engine::{CacheSettings, EngineStats, Reconciler};
pub use error::{Error, Result};
pub use remote::{AccessRoot, AccessToken, HttpRemote, RemoteError, RemoteStore};
pub use session::Session;
