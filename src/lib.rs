//! Hulk - record/replay fixture store for outbound HTTP calls
//!
//! Calls are fingerprinted into a stable hash, looked up in a dataset of
//! recorded fixtures, and either replayed, recorded from the real origin,
//! or reported as absent.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod fingerprint;
pub mod intercept;
pub mod origin;
pub mod proxy;
pub mod replay;
pub mod storage;

pub use error::{HulkError, Result};
