//! Scoped dataset override

use tracing::error;

use super::DatasetSelector;
use crate::Result;

/// Guard that keeps a dataset active until dropped
///
/// On drop, the dataset that was active when the scope was opened is put
/// back (or the pointer is cleared if nothing was active).
#[must_use = "the previous dataset is restored as soon as the scope is dropped"]
pub struct DatasetScope<'a> {
    selector: &'a DatasetSelector,
    dataset: String,
    previous: Option<String>,
    restored: bool,
}

impl<'a> DatasetScope<'a> {
    pub(super) fn new(
        selector: &'a DatasetSelector,
        dataset: &str,
        previous: Option<String>,
    ) -> Self {
        Self {
            selector,
            dataset: dataset.to_string(),
            previous,
            restored: false,
        }
    }

    /// Dataset active inside this scope
    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Dataset that will be restored
    #[must_use]
    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    /// Restore the previous dataset now, reporting failures
    ///
    /// # Errors
    ///
    /// Returns error if the pointer cannot be written
    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        self.selector.restore_to(self.previous.as_deref())
    }

    /// Give up the restore on drop, handing the previous dataset to the caller
    pub(super) fn disarm(mut self) -> Option<String> {
        self.restored = true;
        self.previous.take()
    }
}

impl Drop for DatasetScope<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = self.selector.restore_to(self.previous.as_deref()) {
            error!(
                "Failed to restore dataset {:?} after scope '{}': {}",
                self.previous, self.dataset, e
            );
        }
    }
}
