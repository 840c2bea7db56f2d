//! Translation between HTTP messages and engine calls

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use hyper::http::request::Parts;
use hyper::{Response, StatusCode};
use tracing::warn;

use super::ORIGIN_FAILURE_STATUS;
use crate::replay::{parse_query, Call, FixtureResponse, FALLBACK_CONTENT_TYPE};
use crate::{HulkError, Result};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Read a request body, refusing anything over `max_size` bytes
///
/// # Errors
///
/// Returns [`HulkError::BodyTooLarge`] if the body is over the limit
pub async fn read_body<B>(parts: &Parts, body: B, max_size: usize) -> Result<Bytes>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > max_size) {
        return Err(HulkError::BodyTooLarge { limit: max_size });
    }

    let collected = Limited::new(body, max_size).collect().await.map_err(|e| {
        if e.downcast_ref::<LengthLimitError>().is_some() {
            HulkError::BodyTooLarge { limit: max_size }
        } else {
            HulkError::Other(format!("Failed to read body: {e}"))
        }
    })?;

    Ok(collected.to_bytes())
}

/// Build the engine call for an inbound request
///
/// The host comes from an absolute-form URI or the `Host` header. The body
/// is decoded as form parameters when it is urlencoded.
///
/// # Errors
///
/// Returns [`HulkError::InvalidRequest`] if no host can be determined
pub fn build_call(parts: &Parts, body: &[u8]) -> Result<Call> {
    let host = parts
        .uri
        .authority()
        .map(|a| a.as_str().rsplit('@').next().unwrap_or_default().to_string())
        .or_else(|| {
            parts
                .headers
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .map(|h| h.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .ok_or_else(|| HulkError::InvalidRequest("request has no host".to_string()))?;

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut call = Call::new(parts.method.as_str(), &host, parts.uri.path())
        .with_content_type(content_type.clone());

    if let Some(scheme) = parts.uri.scheme_str() {
        call = call.with_scheme(scheme);
    }
    if let Some(query) = parts.uri.query() {
        call = call.with_query(parse_query(query));
    }

    let is_form = content_type
        .as_deref()
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE));
    if is_form && !body.is_empty() {
        call = call.with_form(parse_query(&String::from_utf8_lossy(body)));
    }

    Ok(call)
}

/// HTTP status for an error
#[must_use]
pub fn error_status(error: &HulkError) -> StatusCode {
    if error.is_origin_failure() {
        return StatusCode::from_u16(ORIGIN_FAILURE_STATUS).unwrap_or(StatusCode::BAD_GATEWAY);
    }
    match error {
        HulkError::InvalidName(_) | HulkError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        HulkError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turn an engine result into an HTTP response
#[must_use]
pub fn render(result: Result<FixtureResponse>) -> Response<Full<Bytes>> {
    match result {
        Ok(fixture) => {
            let status =
                StatusCode::from_u16(fixture.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let content_type = HeaderValue::from_str(&fixture.content_type)
                .unwrap_or(HeaderValue::from_static(FALLBACK_CONTENT_TYPE));
            response(status, content_type, fixture.body)
        }
        Err(e) => {
            let status = error_status(&e);
            warn!("Answering {}: {}", status, e);
            response(
                status,
                HeaderValue::from_static("text/plain; charset=utf-8"),
                format!("Error: {e}").into_bytes(),
            )
        }
    }
}

fn response(status: StatusCode, content_type: HeaderValue, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}
