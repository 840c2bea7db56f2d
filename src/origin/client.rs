//! HTTP client for fetching origin responses

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use super::{is_supported, Origin, OriginRequest, OriginResponse};
use crate::fingerprint::form_encode;
use crate::{HulkError, Result};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Origin reached over plain HTTP
pub struct HttpOrigin {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpOrigin {
    /// Create a new HTTP origin client
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        Self { client }
    }

    async fn send(&self, request: &OriginRequest) -> Result<OriginResponse> {
        if !is_supported(&request.method) {
            return Err(HulkError::UnsupportedMethod(request.method.clone()));
        }

        let uri = build_uri(&request.url, &request.query)?;
        debug!("Fetching origin {} {}", request.method, uri);

        let method = request.method.to_ascii_uppercase().parse::<Method>().map_err(|e| {
            HulkError::Other(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        let mut builder = Request::builder().method(method.clone()).uri(uri);

        let body = if method == Method::GET {
            Bytes::new()
        } else {
            builder = builder.header(CONTENT_TYPE, FORM_CONTENT_TYPE);
            let pairs = request.form.iter().map(|(k, v)| (k.as_str(), v.as_str()));
            Bytes::from(form_encode(pairs))
        };

        let http_request = builder
            .body(Full::new(body))
            .map_err(|e| HulkError::Other(format!("Failed to build request: {e}")))?;

        let response = self.client.request(http_request).await.map_err(|e| {
            warn!("Origin request failed: {e}");
            HulkError::OriginTransport(format!("{} {}: {e}", request.method, request.url))
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| HulkError::OriginTransport(format!("Failed to read response body: {e}")))?
            .to_bytes();

        Ok(OriginResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

impl Default for HttpOrigin {
    fn default() -> Self {
        Self::new()
    }
}

impl Origin for HttpOrigin {
    async fn fetch(&self, request: &OriginRequest) -> Result<OriginResponse> {
        self.send(request).await
    }
}

/// Append form-encoded query parameters to `url`
fn build_uri(url: &str, query: &[(String, String)]) -> Result<Uri> {
    let mut uri = url.to_string();

    if !query.is_empty() {
        uri.push(if url.contains('?') { '&' } else { '?' });
        uri.push_str(&form_encode(
            query.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        ));
    }

    uri.parse::<Uri>()
        .map_err(|e| HulkError::Other(format!("Invalid URI '{uri}': {e}")))
}
