//! Inbound or intercepted call, as seen by the engine

use hyper::Uri;

use crate::fingerprint::{form_encode, Params};
use crate::{HulkError, Result};

/// A call to be replayed or recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// HTTP method, uppercase
    pub method: String,
    /// Scheme used to reach the origin when recording
    pub scheme: String,
    /// Target host, including a port if one was given
    pub host: String,
    /// Request path, always starting with '/'
    pub path: String,
    /// Query-string parameters
    pub query: Params,
    /// Form/body parameters
    pub form: Params,
    /// Content type of the incoming call, if any
    pub content_type: Option<String>,
}

impl Call {
    /// Create a call with no parameters
    #[must_use]
    pub fn new(method: &str, host: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            scheme: "http".to_string(),
            host: host.to_string(),
            path: normalize_path(path),
            query: Params::new(),
            form: Params::new(),
            content_type: None,
        }
    }

    /// Parse an absolute URL into a call; its query string becomes `query`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is not absolute
    pub fn from_url(method: &str, url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| HulkError::Other(format!("Invalid URL '{url}': {e}")))?;

        let host = uri
            .authority()
            .map(|a| a.as_str().rsplit('@').next().unwrap_or_default().to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| HulkError::Other(format!("URL has no host: '{url}'")))?;

        let mut call = Self::new(method, &host, uri.path());
        if let Some(scheme) = uri.scheme_str() {
            call.scheme = scheme.to_string();
        }
        if let Some(query) = uri.query() {
            call.query = parse_query(query);
        }
        Ok(call)
    }

    /// Replace the query parameters
    #[must_use]
    pub fn with_query(mut self, query: Params) -> Self {
        self.query = query;
        self
    }

    /// Replace the form parameters
    #[must_use]
    pub fn with_form(mut self, form: Params) -> Self {
        self.form = form;
        self
    }

    /// Set the scheme
    #[must_use]
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    /// Set the content type of the incoming call
    #[must_use]
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Parameters that make up the fingerprint
    #[must_use]
    pub fn params(&self) -> Params {
        Params::merge(&self.method, &self.query, &self.form)
    }

    /// Origin URL without query string
    #[must_use]
    pub fn origin_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }

    /// Full origin URL, query string included
    #[must_use]
    pub fn full_url(&self) -> String {
        let query = form_encode(self.query.present());
        if query.is_empty() {
            self.origin_url()
        } else {
            format!("{}?{query}", self.origin_url())
        }
    }
}

/// Decode an `application/x-www-form-urlencoded` string
///
/// A key without '=' maps to an empty value.
#[must_use]
pub fn parse_query(raw: &str) -> Params {
    let mut params = Params::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(form_unescape(key), Some(form_unescape(value)));
    }
    params
}

fn form_unescape(s: &str) -> String {
    let spaced = s.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

/// Ensure a leading slash and strip surrounding whitespace
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();

    if trimmed.is_empty() || !trimmed.starts_with('/') {
        format!("/{trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::canonical_string;

    #[test]
    fn test_path_normalization() {
        assert_eq!(normalize_path("/api/test"), "/api/test");
        assert_eq!(normalize_path("api/test"), "/api/test");
        assert_eq!(normalize_path("  /api/test  "), "/api/test");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_from_url() {
        let call = Call::from_url("get", "https://api.example.com:8443/search?q=hot+dog&page=2").unwrap();

        assert_eq!(call.method, "GET");
        assert_eq!(call.scheme, "https");
        assert_eq!(call.host, "api.example.com:8443");
        assert_eq!(call.path, "/search");
        assert_eq!(
            call.query.to_pairs(),
            vec![
                ("page".to_string(), "2".to_string()),
                ("q".to_string(), "hot dog".to_string()),
            ]
        );
    }

    #[test]
    fn test_from_url_without_path() {
        let call = Call::from_url("GET", "http://example.com").unwrap();
        assert_eq!(call.path, "/");
        assert_eq!(call.full_url(), "http://example.com/");
    }

    #[test]
    fn test_from_url_requires_host() {
        assert!(Call::from_url("GET", "/relative/only").is_err());
    }

    #[test]
    fn test_parse_query_decoding() {
        let params = parse_query("a=1&b=x%26y&flag&&c=%E2%9C%93");
        assert_eq!(
            canonical_string("/", &params),
            "/?a=1&b=x%26y&c=%E2%9C%93&flag="
        );
    }

    #[test]
    fn test_params_merge_by_method() {
        let query = parse_query("q=cat");
        let form = parse_query("token=abc");

        let get = Call::new("GET", "h", "/x")
            .with_query(query.clone())
            .with_form(form.clone());
        assert_eq!(canonical_string(&get.path, &get.params()), "/x?q=cat");

        let post = Call::new("POST", "h", "/x").with_query(query).with_form(form);
        assert_eq!(
            canonical_string(&post.path, &post.params()),
            "/x?q=cat&token=abc"
        );
    }

    #[test]
    fn test_full_url() {
        let call = Call::new("GET", "api.example.com", "/search")
            .with_query(parse_query("q=hot+dog"));
        assert_eq!(call.full_url(), "http://api.example.com/search?q=hot+dog");
        assert_eq!(call.origin_url(), "http://api.example.com/search");
    }
}
