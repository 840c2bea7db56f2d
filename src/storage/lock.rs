//! Advisory file locks shared between cooperating processes

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::{HulkError, Result};

const BACKOFF_START: Duration = Duration::from_millis(1);
const BACKOFF_MAX: Duration = Duration::from_millis(50);

/// Kind of advisory lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers
    Shared,
    /// Single writer (or reader that must not race a writer)
    Exclusive,
}

/// An open file holding an advisory lock until dropped
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Open `path` with `options` and lock it, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// Returns the open error unchanged (so callers can match `NotFound`),
    /// or [`HulkError::LockTimeout`] if the lock stays contended
    pub fn acquire(
        path: &Path,
        options: &OpenOptions,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<Self> {
        let file = options.open(path)?;
        let deadline = Instant::now() + timeout;
        let mut backoff = BACKOFF_START;

        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };

            match attempt {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(HulkError::LockTimeout {
                    path: path.to_path_buf(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    /// The locked file
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Path of the locked file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
