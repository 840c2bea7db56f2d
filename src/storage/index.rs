//! Per-dataset fixture index (`dataset.json`)

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::lock::{FileLock, LockMode};
use crate::{HulkError, Result};

/// Metadata recorded for one fixture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Content type the fixture is served with
    #[serde(rename = "content-type", default)]
    pub content_type: Option<String>,
    /// Host plus canonical request, e.g. `api.example.com/search?q=cat`
    pub url: String,
}

/// Mapping of fingerprint hash to metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetIndex(BTreeMap<String, IndexEntry>);

impl DatasetIndex {
    /// Parse index contents; empty or whitespace-only contents are an empty index
    ///
    /// # Errors
    ///
    /// Returns error if the contents are not a JSON object of entries
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(content).map_err(|e| HulkError::InvalidIndex {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Insert or replace the entry for `hash`
    pub fn upsert(&mut self, hash: impl Into<String>, entry: IndexEntry) {
        self.0.insert(hash.into(), entry);
    }

    /// Entry for `hash`
    #[must_use]
    pub fn get(&self, hash: &str) -> Option<&IndexEntry> {
        self.0.get(hash)
    }

    /// Entries in hash order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the index has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Read the index at `path` under a shared lock
///
/// A missing file is an empty index.
pub(crate) fn load(path: &Path, timeout: Duration) -> Result<DatasetIndex> {
    let mut options = OpenOptions::new();
    options.read(true);

    let lock = match FileLock::acquire(path, &options, LockMode::Shared, timeout) {
        Ok(lock) => lock,
        Err(HulkError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(DatasetIndex::default())
        }
        Err(e) => return Err(e),
    };

    let mut content = String::new();
    lock.file().read_to_string(&mut content)?;
    DatasetIndex::parse(&content, path)
}

/// Upsert one entry with the whole read-modify-write under an exclusive lock
///
/// Concurrent recorders into the same dataset serialize on this lock, so no
/// update is lost.
pub(crate) fn upsert(path: &Path, hash: &str, entry: IndexEntry, timeout: Duration) -> Result<()> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);

    let lock = FileLock::acquire(path, &options, LockMode::Exclusive, timeout)?;
    let mut file = lock.file();

    let mut content = String::new();
    file.read_to_string(&mut content)?;
    let mut index = DatasetIndex::parse(&content, path)?;

    index.upsert(hash, entry);

    let json = serde_json::to_vec(&index).map_err(|e| HulkError::Other(e.to_string()))?;
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.write_all(&json)?;
    file.sync_data()?;

    debug!("Index {} now has {} entries", path.display(), index.len());

    Ok(())
}
