//! Real origin used to fill missing fixtures while recording

mod client;

pub use client::HttpOrigin;

use std::future::Future;

use crate::Result;

/// Request sent to the origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginRequest {
    /// HTTP method
    pub method: String,
    /// Absolute URL without query string
    pub url: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Form parameters, sent as an urlencoded body for POST/PUT
    pub form: Vec<(String, String)>,
}

/// Response received from the origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginResponse {
    /// HTTP status code
    pub status: u16,
    /// Content type reported by the origin
    pub content_type: Option<String>,
    /// Response body
    pub body: Vec<u8>,
}

impl OriginResponse {
    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can fetch a response from the real service
///
/// Implementations report transport problems as errors and hand back any
/// HTTP status untouched; the engine decides what counts as a failure.
pub trait Origin: Send + Sync {
    /// Perform the request
    fn fetch(&self, request: &OriginRequest) -> impl Future<Output = Result<OriginResponse>> + Send;
}

/// Methods the origin collaborator supports
pub const SUPPORTED_METHODS: [&str; 3] = ["GET", "POST", "PUT"];

/// Whether `method` can be recorded
#[must_use]
pub fn is_supported(method: &str) -> bool {
    SUPPORTED_METHODS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method))
}
