//! Local cache stores
//!
//! Interchangeable adapters behind the `CacheStore` contract: an ephemeral
//! Moka store, a persistent SQLite store and a null store that caches nothing.

pub mod errors;
pub mod memory;
pub mod null;
pub mod sqlite;
pub mod store;

pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use null::NullStore;
pub use sqlite::SqliteStore;
pub use store::{CacheStore, FileRecord, Timestamp, UserFolderRecord, UserId};
