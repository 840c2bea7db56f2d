//! Interception contract for outbound HTTP calls
//!
//! Application code sends its outbound calls through a [`Transport`].
//! In production that is a real HTTP client; under test it is a
//! [`ReplayTransport`], which answers from the fixture store instead of the
//! network.

mod transport;

pub use transport::ReplayTransport;

use std::future::Future;

use crate::{HulkError, Result};

/// Outbound request as issued by application code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundRequest {
    /// HTTP method
    pub method: String,
    /// Absolute URL, may carry its own query string
    pub url: String,
    /// Extra query parameters; `None` values are dropped
    pub params: Vec<(String, Option<String>)>,
    /// Form parameters; `None` values are dropped
    pub form: Vec<(String, Option<String>)>,
}

impl OutboundRequest {
    /// GET request for `url`
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// POST request for `url`
    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// PUT request for `url`
    #[must_use]
    pub fn put(url: impl Into<String>) -> Self {
        Self {
            method: "PUT".to_string(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Add a query parameter
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: Option<&str>) -> Self {
        self.params.push((key.into(), value.map(str::to_string)));
        self
    }

    /// Add a form parameter
    #[must_use]
    pub fn form(mut self, key: impl Into<String>, value: Option<&str>) -> Self {
        self.form.push((key.into(), value.map(str::to_string)));
        self
    }
}

/// Response handed back to application code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// URL that was requested
    pub url: String,
    /// Content type of the body
    pub content_type: String,
    /// Response body
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8 text
    ///
    /// # Errors
    ///
    /// Returns error if the body is not valid UTF-8
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| HulkError::Other(format!("Response body is not UTF-8: {e}")))
    }
}

/// Pluggable transport that outbound HTTP calls go through
pub trait Transport: Send + Sync {
    /// Send one request
    fn send(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<TransportResponse>> + Send;
}
