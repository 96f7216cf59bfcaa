//! Stored responses

use crate::cache::key::CacheKey;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

/// Hop-by-hop headers describe one connection and are never stored
const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "transfer-encoding"];

/// One cached response
///
/// Entries are replaced, never mutated; only successful responses are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,

    /// Status code of the origin response
    pub status: u16,

    /// Headers in the order the origin sent them
    pub headers: Vec<(String, StoredValue)>,

    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    pub cacheable: bool,

    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, status: StatusCode, headers: &HeaderMap, body: Vec<u8>) -> Self {
        Self {
            key,
            status: status.as_u16(),
            headers: storable_headers(headers),
            body,
            cacheable: status.is_success(),
            stored_at: Utc::now(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK)
    }

    /// Rebuild a header map; entries that no longer parse are dropped
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                (Ok(name), Ok(value)) => {
                    map.append(name, value);
                }
                _ => debug!("Dropping stored header {} that no longer parses", name),
            }
        }
        map
    }
}

fn storable_headers(headers: &HeaderMap) -> Vec<(String, StoredValue)> {
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
        .map(|(name, value)| (name.as_str().to_string(), StoredValue::from(value)))
        .collect()
}

/// Raw bytes of a stored header value
///
/// Values that are valid UTF-8 serialize as plain strings; anything else as
/// `{"base64": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue(Vec<u8>);

impl StoredValue {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&HeaderValue> for StoredValue {
    fn from(value: &HeaderValue) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StoredValueRepr<'a> {
    Text(std::borrow::Cow<'a, str>),
    Binary { base64: String },
}

impl Serialize for StoredValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let repr = match std::str::from_utf8(&self.0) {
            Ok(text) => StoredValueRepr::Text(text.into()),
            Err(_) => StoredValueRepr::Binary {
                base64: STANDARD.encode(&self.0),
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StoredValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use base64::{engine::general_purpose::STANDARD, Engine};

        match StoredValueRepr::deserialize(deserializer)? {
            StoredValueRepr::Text(text) => Ok(Self(text.into_owned().into_bytes())),
            StoredValueRepr::Binary { base64 } => STANDARD
                .decode(base64)
                .map(Self)
                .map_err(serde::de::Error::custom),
        }
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
