//! Cache key derivation

use crate::server::Request;
use http::HeaderName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a cached response
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for `request`: its path, plus `|name=value` for each vary header present
    ///
    /// Query strings are ignored. Vary headers are appended in sorted name
    /// order so configuration order does not matter.
    pub fn from_request(request: &Request, vary_headers: &[HeaderName]) -> Self {
        let mut names: Vec<&HeaderName> = vary_headers.iter().collect();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        names.dedup();

        let mut key = request.path().to_string();
        for name in names {
            let values: Vec<&str> = request
                .headers()
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect();
            if !values.is_empty() {
                key.push('|');
                key.push_str(name.as_str());
                key.push('=');
                key.push_str(&values.join(","));
            }
        }

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
