//! Inbound HTTP server answering calls from the fixture store
//!
//! The application under test is pointed at this server instead of the
//! real service. Each request is turned into a [`Call`](crate::replay::Call)
//! and handed to the [`ReplayEngine`](crate::replay::ReplayEngine).

mod connection_pool;
mod handler;
mod server;

pub use connection_pool::{ConnectionGuard, ConnectionPool};
pub use handler::{build_call, error_status, read_body, render};
pub use server::{ProxyServer, ShutdownHandle};

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// Status answered when the origin failed during RECORD
pub const ORIGIN_FAILURE_STATUS: u16 = 502;
