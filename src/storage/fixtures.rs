//! Fixture bodies and their index, addressed by dataset, host and hash

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use super::index::{self, DatasetIndex, IndexEntry};
use super::validate::validate_name;
use super::INDEX_FILE_NAME;
use crate::config::Config;
use crate::{HulkError, Result};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Filesystem-backed fixture store
#[derive(Debug, Clone)]
pub struct FixtureStore {
    base_dir: PathBuf,
    lock_timeout: Duration,
}

impl FixtureStore {
    /// Create a store rooted at `base_dir`
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            base_dir: base_dir.into(),
            lock_timeout,
        }
    }

    /// Create a store from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.base_dir.clone(), config.lock_timeout())
    }

    /// Base directory of the store
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory of a dataset
    ///
    /// # Errors
    ///
    /// Returns error if the dataset name is not filesystem-safe
    pub fn dataset_dir(&self, dataset: &str) -> Result<PathBuf> {
        validate_name(dataset)?;
        Ok(self.base_dir.join(dataset))
    }

    /// Path of a fixture body
    ///
    /// # Errors
    ///
    /// Returns error if dataset or host is not filesystem-safe
    pub fn fixture_path(&self, dataset: &str, host: &str, hash: &str) -> Result<PathBuf> {
        validate_name(host)?;
        validate_name(hash)?;
        Ok(self.dataset_dir(dataset)?.join(host).join(hash))
    }

    /// Path of a dataset's index
    ///
    /// # Errors
    ///
    /// Returns error if the dataset name is not filesystem-safe
    pub fn index_path(&self, dataset: &str) -> Result<PathBuf> {
        Ok(self.dataset_dir(dataset)?.join(INDEX_FILE_NAME))
    }

    /// Whether a fixture body exists
    ///
    /// # Errors
    ///
    /// Returns error if names are invalid
    pub fn exists(&self, dataset: &str, host: &str, hash: &str) -> Result<bool> {
        Ok(self.fixture_path(dataset, host, hash)?.is_file())
    }

    /// Read a fixture body; `None` when it was never recorded
    ///
    /// # Errors
    ///
    /// Returns error if names are invalid or the file cannot be read
    pub fn read(&self, dataset: &str, host: &str, hash: &str) -> Result<Option<Vec<u8>>> {
        let path = self.fixture_path(dataset, host, hash)?;
        debug!("Reading fixture {}", path.display());

        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a fixture body, creating `<dataset>/<host>/` as needed
    ///
    /// The body is written to a temporary sibling and renamed into place, so
    /// a concurrent reader sees either nothing or the whole body.
    ///
    /// # Errors
    ///
    /// Returns error if names are invalid or any filesystem call fails
    pub fn write(&self, dataset: &str, host: &str, hash: &str, body: &[u8]) -> Result<()> {
        let path = self.fixture_path(dataset, host, hash)?;
        let dir = self.dataset_dir(dataset)?.join(host);
        create_dir(&dir)?;

        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".{hash}.{}.{seq}.tmp", std::process::id()));
        fs::write(&tmp, body)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!("Wrote {} bytes to {}", body.len(), path.display());
        Ok(())
    }

    /// Upsert the index entry for `hash` in `dataset`
    ///
    /// # Errors
    ///
    /// Returns error if the index cannot be locked, parsed or written
    pub fn record_index(
        &self,
        dataset: &str,
        hash: &str,
        content_type: Option<&str>,
        url: &str,
    ) -> Result<()> {
        let dir = self.dataset_dir(dataset)?;
        create_dir(&dir)?;

        let entry = IndexEntry {
            content_type: content_type.map(str::to_string),
            url: url.to_string(),
        };
        index::upsert(&dir.join(INDEX_FILE_NAME), hash, entry, self.lock_timeout)
    }

    /// Write body and index entry together
    ///
    /// # Errors
    ///
    /// Returns the first storage failure; the fixture is not recorded then
    pub fn record(
        &self,
        dataset: &str,
        host: &str,
        hash: &str,
        body: &[u8],
        content_type: Option<&str>,
        url: &str,
    ) -> Result<()> {
        self.write(dataset, host, hash, body)?;
        self.record_index(dataset, hash, content_type, url)?;

        info!("Recorded {} in {}/{} ({})", hash, dataset, host, url);
        Ok(())
    }

    /// Load a dataset's whole index
    ///
    /// # Errors
    ///
    /// Returns error if the index exists but cannot be read or parsed
    pub fn load_index(&self, dataset: &str) -> Result<DatasetIndex> {
        index::load(&self.index_path(dataset)?, self.lock_timeout)
    }

    /// Index entry for one fixture
    ///
    /// # Errors
    ///
    /// Returns error if the index exists but cannot be read or parsed
    pub fn index_entry(&self, dataset: &str, hash: &str) -> Result<Option<IndexEntry>> {
        Ok(self.load_index(dataset)?.get(hash).cloned())
    }

    /// Names of all datasets under the base directory
    ///
    /// # Errors
    ///
    /// Returns error if the base directory exists but cannot be listed
    pub fn list_datasets(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if validate_name(name).is_ok() {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Check every index entry of `dataset` against the body files
    ///
    /// # Errors
    ///
    /// Returns error if the index cannot be loaded
    pub fn verify(&self, dataset: &str) -> Result<VerifyReport> {
        let index = self.load_index(dataset)?;
        let dataset_dir = self.dataset_dir(dataset)?;

        let mut dangling = Vec::new();
        for (hash, entry) in index.iter() {
            let host = host_of(&entry.url);
            let present = !host.is_empty()
                && validate_name(host).is_ok()
                && validate_name(hash).is_ok()
                && dataset_dir.join(host).join(hash).is_file();

            if !present {
                dangling.push(DanglingEntry {
                    hash: hash.to_string(),
                    url: entry.url.clone(),
                });
            }
        }

        Ok(VerifyReport {
            dataset: dataset.to_string(),
            entries: index.len(),
            dangling,
        })
    }
}

/// Index entry whose body file is missing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingEntry {
    /// Fingerprint hash
    pub hash: String,
    /// Recorded URL
    pub url: String,
}

/// Result of [`FixtureStore::verify`]
#[derive(Debug, Clone)]
pub struct VerifyReport {
    /// Dataset checked
    pub dataset: String,
    /// Number of index entries checked
    pub entries: usize,
    /// Entries without a body
    pub dangling: Vec<DanglingEntry>,
}

impl VerifyReport {
    /// Whether every index entry has a body
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty()
    }

    /// Turn the first dangling entry into [`HulkError::IndexCorrupted`]
    ///
    /// # Errors
    ///
    /// Returns error if any entry is dangling
    pub fn into_result(self) -> Result<()> {
        match self.dangling.into_iter().next() {
            None => Ok(()),
            Some(entry) => Err(HulkError::IndexCorrupted {
                dataset: self.dataset,
                hash: entry.hash,
                url: entry.url,
            }),
        }
    }
}

// Recorded URLs are `host + canonical`, the canonical part starting at '/'.
fn host_of(url: &str) -> &str {
    url.split(|c: char| c == '/' || c == '?').next().unwrap_or_default()
}

fn create_dir(dir: &Path) -> Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FixtureStore {
        FixtureStore::new(dir.path(), Duration::from_secs(2))
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .write("orders", "api.example.com", "abc123", b"{\"id\":1}")
            .unwrap();

        assert!(store.exists("orders", "api.example.com", "abc123").unwrap());
        assert_eq!(
            store.read("orders", "api.example.com", "abc123").unwrap(),
            Some(b"{\"id\":1}".to_vec())
        );
        assert!(dir.path().join("orders/api.example.com/abc123").is_file());
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(!store.exists("orders", "api.example.com", "nope").unwrap());
        assert_eq!(store.read("orders", "api.example.com", "nope").unwrap(), None);
        assert!(!dir.path().join("orders").exists());
    }

    #[test]
    fn test_write_overwrites_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.write("d", "h", "x", b"first").unwrap();
        store.write("d", "h", "x", b"second").unwrap();

        assert_eq!(store.read("d", "h", "x").unwrap(), Some(b"second".to_vec()));
        let files: Vec<_> = fs::read_dir(dir.path().join("d/h")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_write_fails_when_dir_is_a_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        fs::create_dir_all(dir.path().join("d")).unwrap();
        fs::write(dir.path().join("d/h"), b"in the way").unwrap();

        assert!(matches!(
            store.write("d", "h", "x", b"body"),
            Err(HulkError::Io(_))
        ));
    }

    #[test]
    fn test_rejects_unsafe_names() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.write("..", "h", "x", b"").is_err());
        assert!(store.write("d", "../h", "x", b"").is_err());
        assert!(store.read("d", "h", "../x").is_err());
    }

    #[test]
    fn test_record_writes_body_and_index() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .record(
                "orders",
                "api.example.com",
                "abc123",
                b"{}",
                Some("application/json"),
                "api.example.com/orders?id=1",
            )
            .unwrap();

        let entry = store.index_entry("orders", "abc123").unwrap().unwrap();
        assert_eq!(entry.content_type.as_deref(), Some("application/json"));
        assert_eq!(entry.url, "api.example.com/orders?id=1");
        assert!(dir.path().join("orders/dataset.json").is_file());
    }

    #[test]
    fn test_record_index_upsert_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .record_index("orders", "abc123", Some("text/plain"), "h/a")
            .unwrap();
        store
            .record_index("orders", "abc123", Some("application/json"), "h/b")
            .unwrap();

        let index = store.load_index("orders").unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("abc123").unwrap().url, "h/b");
    }

    #[test]
    fn test_verify_detects_dangling_entries() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .record("d", "api.example.com", "good", b"ok", None, "api.example.com/a")
            .unwrap();
        store
            .record_index("d", "bad", None, "api.example.com/b?x=1")
            .unwrap();
        // Body without an index entry is fine
        store.write("d", "api.example.com", "orphan", b"x").unwrap();

        let report = store.verify("d").unwrap();
        assert_eq!(report.entries, 2);
        assert_eq!(
            report.dangling,
            vec![DanglingEntry {
                hash: "bad".to_string(),
                url: "api.example.com/b?x=1".to_string(),
            }]
        );
        assert!(matches!(
            report.into_result(),
            Err(HulkError::IndexCorrupted { hash, .. }) if hash == "bad"
        ));
    }

    #[test]
    fn test_verify_clean_dataset() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .record("d", "h", "x", b"ok", Some("text/plain"), "h/")
            .unwrap();
        let report = store.verify("d").unwrap();
        assert!(report.is_clean());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_list_datasets() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.list_datasets().unwrap().is_empty());

        store.write("search", "h", "x", b"").unwrap();
        store.write("orders", "h", "x", b"").unwrap();
        fs::write(dir.path().join("stray.txt"), b"").unwrap();

        assert_eq!(store.list_datasets().unwrap(), vec!["orders", "search"]);
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("api.example.com/search?q=cat"), "api.example.com");
        assert_eq!(host_of("localhost:8080/"), "localhost:8080");
        assert_eq!(host_of("h?x=1"), "h");
        assert_eq!(host_of(""), "");
    }
}
