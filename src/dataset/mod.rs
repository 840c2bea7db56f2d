//! Active dataset selection shared between cooperating processes
//!
//! The active dataset lives in a plain-text pointer file. An empty or
//! missing file means "unset", in which case callers fall back to their
//! configured default. Every read and write holds an exclusive advisory
//! lock on the pointer file.

mod scope;
mod selector;

pub use scope::DatasetScope;
pub use selector::DatasetSelector;
