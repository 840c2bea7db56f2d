//! Lock-guarded pointer file holding the active dataset

use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use super::DatasetScope;
use crate::config::Config;
use crate::storage::{run_blocking, validate_name, FileLock, LockMode};
use crate::{HulkError, Result};

/// Shared "current dataset" pointer
///
/// Construct one and hand it (usually behind an `Arc`) to every component
/// that needs to know which dataset is active.
#[derive(Debug, Clone)]
pub struct DatasetSelector {
    pointer: PathBuf,
    lock_timeout: Duration,
}

impl DatasetSelector {
    /// Create a selector backed by `pointer`
    #[must_use]
    pub fn new(pointer: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            pointer: pointer.into(),
            lock_timeout,
        }
    }

    /// Create a selector from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.pointer_file.clone(), config.lock_timeout())
    }

    /// Path of the pointer file
    #[must_use]
    pub fn pointer_path(&self) -> &Path {
        &self.pointer
    }

    /// Make `name` the active dataset
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid, the lock times out or the
    /// pointer cannot be written
    pub fn set_active(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.swap(name)?;
        info!("Active dataset set to '{}'", name);
        Ok(())
    }

    /// Unset the active dataset
    ///
    /// # Errors
    ///
    /// Returns error if the lock times out or the pointer cannot be written
    pub fn clear_active(&self) -> Result<()> {
        self.swap("")?;
        info!("Active dataset cleared");
        Ok(())
    }

    /// The active dataset, or `None` when unset
    ///
    /// # Errors
    ///
    /// Returns error if the pointer exists but cannot be locked or read
    pub fn current(&self) -> Result<Option<String>> {
        let mut options = OpenOptions::new();
        options.read(true);

        let lock = match FileLock::acquire(
            &self.pointer,
            &options,
            LockMode::Exclusive,
            self.lock_timeout,
        ) {
            Ok(lock) => lock,
            Err(HulkError::Io(e)) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut content = String::new();
        lock.file().read_to_string(&mut content)?;
        Ok(non_empty(&content))
    }

    /// The active dataset, or `default` when unset
    ///
    /// # Errors
    ///
    /// Returns error if the pointer exists but cannot be locked or read
    pub fn get_active(&self, default: &str) -> Result<String> {
        let active = self.current()?.unwrap_or_else(|| default.to_string());
        debug!("Resolved active dataset '{}'", active);
        Ok(active)
    }

    /// Activate `name` until the returned guard is dropped
    ///
    /// The guard restores whatever was active before, so scopes nest.
    ///
    /// # Errors
    ///
    /// Returns error if the dataset cannot be activated
    pub fn scope(&self, name: &str) -> Result<DatasetScope<'_>> {
        validate_name(name)?;
        let previous = self.swap(name)?;
        info!("(dataset: {})", name);
        Ok(DatasetScope::new(self, name, previous))
    }

    /// Run `body` with `name` active, then restore the previous dataset
    ///
    /// The previous dataset is restored even if `body` panics; the panic
    /// then continues to unwind. A `Result` returned by `body` is passed
    /// through untouched.
    ///
    /// # Errors
    ///
    /// Returns error if the dataset cannot be activated or restored
    pub fn with_dataset<T, F>(&self, name: &str, body: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        let scope = self.scope(name)?;
        let value = body();
        scope.restore()?;
        Ok(value)
    }

    /// Async form of [`with_dataset`](Self::with_dataset)
    ///
    /// Pointer writes run on the blocking pool. The previous dataset is
    /// also restored if the future is dropped before completing.
    ///
    /// # Errors
    ///
    /// Returns error if the dataset cannot be activated or restored
    pub async fn with_dataset_async<F>(&self, name: &str, body: F) -> Result<F::Output>
    where
        F: Future,
    {
        validate_name(name)?;
        let selector = self.clone();
        let value = name.to_string();
        let previous = run_blocking(move || selector.swap(&value)).await?;
        info!("(dataset: {})", name);

        let scope = DatasetScope::new(self, name, previous);
        let output = body.await;

        let previous = scope.disarm();
        let selector = self.clone();
        run_blocking(move || selector.restore_to(previous.as_deref())).await?;
        Ok(output)
    }

    /// Write `value` (empty string = unset)
    pub(crate) fn restore_to(&self, value: Option<&str>) -> Result<()> {
        self.swap(value.unwrap_or_default())?;
        debug!("Restored active dataset to {:?}", value);
        Ok(())
    }

    /// Replace the pointer contents under one lock, returning the old value
    fn swap(&self, value: &str) -> Result<Option<String>> {
        if let Some(parent) = self.pointer.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);

        let lock = FileLock::acquire(
            &self.pointer,
            &options,
            LockMode::Exclusive,
            self.lock_timeout,
        )?;
        let mut file = lock.file();

        let mut previous = String::new();
        file.read_to_string(&mut previous)?;

        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(value.as_bytes())?;
        file.sync_data()?;

        Ok(non_empty(&previous))
    }
}

fn non_empty(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
