//! Recorded request/response pairs and their cassette wire form
//!
//! An [`Entry`] is one interaction captured from the service under test. The
//! session store treats it as a payload: it assigns the index, flips the
//! removed flag, and otherwise leaves the content to sanitizers.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{CassetteError, Result};

/// Ordered HTTP header list
///
/// Names are stored exactly as recorded. Exact-name lookups are case
/// sensitive; the `_ignore_case` variants compare ASCII case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Create an empty header list
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Get a header value by exact name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a header value, comparing names case-insensitively
    #[must_use]
    pub fn get_ignore_case(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing the value of an exactly-named header if present
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((name, value)),
        }
    }

    /// Remove every header whose name matches case-insensitively
    ///
    /// Returns true if anything was removed.
    pub fn remove_ignore_case(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.0.len() != before
    }

    /// Iterate over `(name, value)` pairs in recorded order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Iterate with mutable access to values
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut String)> {
        self.0.iter_mut().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of headers
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no headers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_wire(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(n, v)| (n.clone(), Value::String(v.clone())))
            .collect()
    }

    fn from_wire(map: &Map<String, Value>, field: &str) -> Result<Self> {
        let mut headers = Self::new();
        for (name, value) in map {
            let value = match value {
                Value::String(s) => s.clone(),
                // Older recordings store every header as a list of values
                Value::Array(values) => values
                    .iter()
                    .map(|v| {
                        v.as_str().map(str::to_string).ok_or_else(|| {
                            CassetteError::Deserialization(format!(
                                "{field}.{name}: header values must be strings"
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
                    .join(", "),
                _ => {
                    return Err(CassetteError::Deserialization(format!(
                        "{field}.{name}: expected string or array of strings"
                    )))
                }
            };
            headers.insert(name.clone(), value);
        }
        Ok(headers)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Recorded HTTP request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedRequest {
    /// HTTP method (e.g., "GET", "POST")
    pub method: String,
    /// Absolute or path-only request URI
    pub uri: String,
    /// Request headers
    pub headers: Headers,
    /// Request body
    pub body: Vec<u8>,
}

/// Recorded HTTP response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Vec<u8>,
}

/// One recorded request/response pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// Session-unique identifier, assigned by the session
    pub index: u64,
    /// Consumed by a replay lookup or explicitly removed
    pub removed: bool,
    /// The request as sent
    pub request: RecordedRequest,
    /// The response as received
    pub response: RecordedResponse,
}

impl Entry {
    /// Create an unindexed entry
    #[must_use]
    pub fn new(request: RecordedRequest, response: RecordedResponse) -> Self {
        Self {
            index: 0,
            removed: false,
            request,
            response,
        }
    }

    /// Create an entry that only carries a request, as used for lookups
    #[must_use]
    pub fn from_request(request: RecordedRequest) -> Self {
        Self::new(request, RecordedResponse::default())
    }

    /// Compare request and response, ignoring index and removed flag
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.request == other.request && self.response == other.response
    }

    /// Compact JSON request and response bodies
    ///
    /// After this, encoding and decoding the entry leaves its bodies byte-for-byte
    /// unchanged.
    pub fn normalize_bodies(&mut self) {
        normalize_json(&self.request.headers, &mut self.request.body);
        normalize_json(&self.response.headers, &mut self.response.body);
    }

    /// Encode as one element of a cassette's `Entries` array
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("RequestUri".into(), Value::String(self.request.uri.clone()));
        map.insert(
            "RequestMethod".into(),
            Value::String(self.request.method.clone()),
        );
        map.insert(
            "RequestHeaders".into(),
            Value::Object(self.request.headers.to_wire()),
        );
        map.insert(
            "RequestBody".into(),
            encode_body(&self.request.body, &self.request.headers),
        );
        map.insert("StatusCode".into(), Value::from(self.response.status));
        map.insert(
            "ResponseHeaders".into(),
            Value::Object(self.response.headers.to_wire()),
        );
        map.insert(
            "ResponseBody".into(),
            encode_body(&self.response.body, &self.response.headers),
        );
        Value::Object(map)
    }

    /// Decode one element of a cassette's `Entries` array
    ///
    /// The returned entry has index 0; the codec assigns the real one.
    ///
    /// # Errors
    ///
    /// Returns error if required fields are missing or have the wrong shape
    pub fn from_value(value: &Value) -> Result<Self> {
        let wire = EntryWire::deserialize(value)
            .map_err(|e| CassetteError::Deserialization(format!("entry: {e}")))?;

        let request_headers = Headers::from_wire(&wire.request_headers, "RequestHeaders")?;
        let response_headers = Headers::from_wire(&wire.response_headers, "ResponseHeaders")?;
        let request_body = decode_body(&wire.request_body, &request_headers, "RequestBody")?;
        let response_body = decode_body(&wire.response_body, &response_headers, "ResponseBody")?;

        Ok(Self::new(
            RecordedRequest {
                method: wire.request_method,
                uri: wire.request_uri,
                headers: request_headers,
                body: request_body,
            },
            RecordedResponse {
                status: wire.status_code,
                headers: response_headers,
                body: response_body,
            },
        ))
    }
}

/// Rewrite a JSON request body into the compact form a cassette reload yields
///
/// Bodies that are not declared as JSON, or do not parse, are left alone.
pub fn normalize_body(request: &mut RecordedRequest) {
    normalize_json(&request.headers, &mut request.body);
}

fn normalize_json(headers: &Headers, body: &mut Vec<u8>) {
    if body.is_empty() || !is_json_content(headers) {
        return;
    }
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if let Ok(compact) = serde_json::to_vec(&value) {
            *body = compact;
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EntryWire {
    request_uri: String,
    request_method: String,
    #[serde(default)]
    request_headers: Map<String, Value>,
    #[serde(default)]
    request_body: Value,
    status_code: u16,
    #[serde(default)]
    response_headers: Map<String, Value>,
    #[serde(default)]
    response_body: Value,
}

fn mime_essence(headers: &Headers) -> Option<String> {
    headers
        .get_ignore_case("content-type")
        .and_then(|ct| ct.split(';').next())
        .map(|mime| mime.trim().to_ascii_lowercase())
}

pub(crate) fn is_json_content(headers: &Headers) -> bool {
    mime_essence(headers).is_some_and(|mime| mime.ends_with("/json") || mime.ends_with("+json"))
}

fn is_text_content(headers: &Headers) -> bool {
    mime_essence(headers).is_some_and(|mime| {
        mime.starts_with("text/")
            || mime.ends_with("json")
            || mime.ends_with("xml")
            || mime.ends_with("javascript")
            || mime == "application/x-www-form-urlencoded"
    })
}

fn encode_body(body: &[u8], headers: &Headers) -> Value {
    if body.is_empty() {
        return Value::Null;
    }

    if is_json_content(headers) {
        if let Ok(value @ (Value::Object(_) | Value::Array(_))) = serde_json::from_slice(body) {
            return value;
        }
    }

    if is_text_content(headers) {
        // Text bodies are stored as text; invalid UTF-8 is replaced
        return Value::String(String::from_utf8_lossy(body).into_owned());
    }

    Value::String(hex::encode(body))
}

fn decode_body(value: &Value, headers: &Headers, field: &str) -> Result<Vec<u8>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if is_text_content(headers) => Ok(s.as_bytes().to_vec()),
        Value::String(s) => hex::decode(s)
            .map_err(|e| CassetteError::Deserialization(format!("{field}: invalid hex body: {e}"))),
        other => Ok(serde_json::to_vec(other)?),
    }
}
