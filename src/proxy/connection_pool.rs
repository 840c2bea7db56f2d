//! Bounded number of in-flight connections

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{HulkError, Result};

/// Semaphore-backed limit on concurrent connections
#[derive(Clone)]
pub struct ConnectionPool {
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    max_connections: usize,
}

impl ConnectionPool {
    /// Create a pool admitting at most `max_connections` at once
    ///
    /// # Errors
    ///
    /// Returns error if `max_connections` is 0
    pub fn new(max_connections: usize) -> Result<Self> {
        if max_connections == 0 {
            return Err(HulkError::ConfigError(
                "max_connections must be > 0".to_string(),
            ));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            active: Arc::new(AtomicUsize::new(0)),
            max_connections,
        })
    }

    /// Take a slot without waiting; `None` when the pool is full
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.guard(permit))
    }

    /// Wait for a slot
    ///
    /// # Errors
    ///
    /// Returns error if the pool has been closed
    pub async fn acquire(&self) -> Result<ConnectionGuard> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| HulkError::Other("Connection pool closed".to_string()))?;
        Ok(self.guard(permit))
    }

    /// Stop handing out slots; pending `acquire` calls fail
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Connections currently holding a slot
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Configured limit
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn guard(&self, permit: OwnedSemaphorePermit) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            _permit: permit,
            active: Arc::clone(&self.active),
        }
    }
}

/// Slot in the pool, released on drop
pub struct ConnectionGuard {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}
