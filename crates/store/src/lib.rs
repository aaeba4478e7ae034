#![warn(clippy::unwrap_used)]

//! Persistence layer for experiment state.
//!
//! - [`local`] — in-process key/value storage with retention and a quota
//! - [`file`] — one JSON document per key on disk
//! - [`store`] — [`PersistenceStore`], which maps a [`CatalogState`] onto
//!   namespaced keys of any [`StorageBackend`]
//!
//! [`CatalogState`]: splitlane_core::CatalogState

pub mod file;
pub mod local;
pub mod store;

use splitlane_core::SplitlaneResult;

pub use file::FileStorage;
pub use local::LocalStorage;
pub use store::PersistenceStore;

/// Durable key/value medium scoped to a browsing session or device.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> SplitlaneResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> SplitlaneResult<()>;

    fn remove(&self, key: &str) -> SplitlaneResult<()>;

    /// All live keys starting with `prefix`.
    fn keys(&self, prefix: &str) -> SplitlaneResult<Vec<String>>;
}
