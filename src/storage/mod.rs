//! On-disk fixture store
//!
//! Layout, relative to the base directory:
//!
//! ```text
//! <dataset>/<host>/<hash>     raw response body
//! <dataset>/dataset.json      {"<hash>": {"content-type": ..., "url": ...}}
//! ```
//!
//! The index is advisory: a body without an index entry is valid, an index
//! entry without a body is reported by [`FixtureStore::verify`].

mod fixtures;
mod index;
mod lock;
mod validate;

pub use fixtures::{DanglingEntry, FixtureStore, VerifyReport};
pub use index::{DatasetIndex, IndexEntry};
pub use lock::{FileLock, LockMode};
pub use validate::validate_name;

/// File name of the per-dataset index
pub const INDEX_FILE_NAME: &str = "dataset.json";

/// Run blocking storage work on tokio's blocking pool
///
/// Lock waits and file I/O must not stall the async workers.
pub(crate) async fn run_blocking<T, F>(work: F) -> crate::Result<T>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| crate::HulkError::Other(format!("join storage task failed: {e}")))?
}
