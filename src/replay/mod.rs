//! Record/replay engine for fixture-backed calls

mod call;
mod engine;

pub use call::{parse_query, Call};
pub use engine::{EngineStats, FixtureResponse, Outcome, ReplayEngine, Resolved};

/// Status answered when no fixture exists and recording is disabled
pub const ABSENT_STATUS: u16 = 417;

/// Content type used when a fixture has no recorded one
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
