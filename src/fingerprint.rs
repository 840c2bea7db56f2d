//! Request fingerprinting for deterministic fixture names
//!
//! A fingerprint is computed from the request path and its parameter set.
//! Parameters whose value is absent are dropped, the rest are sorted by key
//! and form-encoded into a canonical query string. The canonical string is
//! hashed and hex-encoded to name the fixture file.

use std::collections::BTreeMap;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Digest used to turn a canonical string into a fixture name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintDigest {
    /// MD5, the naming used by existing fixture sets
    #[default]
    Md5,
    /// SHA-256
    Sha256,
}

impl FingerprintDigest {
    /// Hash `input` and render it as lowercase hex
    #[must_use]
    pub fn hex_digest(self, input: &[u8]) -> String {
        match self {
            Self::Md5 => hex::encode(Md5::digest(input)),
            Self::Sha256 => hex::encode(Sha256::digest(input)),
        }
    }
}

/// Request parameters keyed by name, ordered by key bytes
///
/// A `None` value marks a parameter that was present without a value; it
/// never contributes to a fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, Option<String>>);

impl Params {
    /// Create an empty parameter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a parameter
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        self.0.insert(key.into(), value);
    }

    /// Merge query and form parameters the way a call is fingerprinted
    ///
    /// Form parameters only take part for non-GET methods and win over a
    /// query parameter with the same key.
    #[must_use]
    pub fn merge(method: &str, query: &Params, form: &Params) -> Self {
        let mut merged = query.clone();
        if !method.eq_ignore_ascii_case("GET") {
            for (key, value) in &form.0 {
                merged.0.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Parameters that carry a value, in key order
    pub fn present(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
    }

    /// Number of parameters, including valueless ones
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameters that carry a value as owned pairs
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.present()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.map(Into::into)))
                .collect(),
        )
    }
}

/// Hash and canonical string identifying a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hex digest of `canonical`
    pub hash: String,
    /// Path plus sorted, encoded query string
    pub canonical: String,
}

/// Compute the fingerprint of `path` with `params`
#[must_use]
pub fn fingerprint(path: &str, params: &Params, digest: FingerprintDigest) -> Fingerprint {
    let canonical = canonical_string(path, params);
    let hash = digest.hex_digest(canonical.as_bytes());

    debug!("fingerprint {} -> {}", canonical, hash);

    Fingerprint { hash, canonical }
}

/// Build `path` or `path?k=v&...` from the parameters that carry a value
#[must_use]
pub fn canonical_string(path: &str, params: &Params) -> String {
    let query = form_encode(params.present());
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    }
}

/// Encode pairs as `application/x-www-form-urlencoded`
pub fn form_encode<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (key, value) in pairs {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(&form_escape(key));
        out.push('=');
        out.push_str(&form_escape(value));
    }
    out
}

// `urlencoding` emits %20 for spaces; a literal '%' becomes %25, so %20
// only ever stands for a space here. '~' is escaped too, matching the
// hashes in fixture sets recorded before it became unreserved.
fn form_escape(s: &str) -> String {
    urlencoding::encode(s).replace("%20", "+").replace('~', "%7E")
}
