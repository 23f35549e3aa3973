//! Request fingerprinting for deterministic replay matching
//!
//! Two requests match under a [`MatchOptions`] exactly when their
//! fingerprints are equal. The fingerprint covers:
//! 1. Method (uppercase normalized)
//! 2. URI (normalized, see [`normalize_uri`])
//! 3. Headers not excluded by the options (names lowercased, sorted), if the
//!    options compare headers
//! 4. Body, if the options compare bodies

use std::borrow::Cow;

use sha2::{Digest, Sha256};

use crate::entry::RecordedRequest;
use crate::matcher::MatchOptions;

/// Headers that vary between otherwise identical runs
pub const DEFAULT_EXCLUDED_HEADERS: &[&str] = &[
    "accept-encoding",
    "connection",
    "content-length",
    "date",
    "traceparent",
    "user-agent",
    "x-ms-client-request-id",
];

/// Compute the SHA-256 fingerprint of a request under the given options
#[must_use]
pub fn fingerprint_request(request: &RecordedRequest, options: &MatchOptions) -> [u8; 32] {
    let mut hasher = Sha256::new();

    // 1. Method
    hash_field(&mut hasher, request.method.to_uppercase().as_bytes());

    // 2. URI
    hash_field(
        &mut hasher,
        normalize_uri(&request.uri, &options.ignored_query_params).as_bytes(),
    );

    // 3. Headers
    let headers = normalized_headers(request, options);
    hasher.update((headers.len() as u32).to_le_bytes());
    for (name, value) in &headers {
        hash_field(&mut hasher, name.as_bytes());
        match value {
            Some(value) => {
                hasher.update([1u8]);
                hash_field(&mut hasher, value.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }

    // 4. Body
    if options.compare_bodies {
        hash_field(&mut hasher, &request.body);
    }

    hasher.finalize().into()
}

/// First eight bytes of a fingerprint as hex, for log lines
#[must_use]
pub fn short_hex(hash: &[u8; 32]) -> String {
    hex::encode(&hash[..8])
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}

/// Headers that take part in matching, lowercased and sorted
///
/// Ignored headers keep their name but drop their value, so they must be
/// present on both sides without having to agree.
pub(crate) fn normalized_headers<'a>(
    request: &'a RecordedRequest,
    options: &MatchOptions,
) -> Vec<(String, Option<&'a str>)> {
    if !options.compare_headers {
        return Vec::new();
    }

    let mut headers: Vec<_> = request
        .headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.to_ascii_lowercase();
            if DEFAULT_EXCLUDED_HEADERS.contains(&name.as_str())
                || contains_ignore_case(&options.excluded_headers, &name)
            {
                return None;
            }
            if contains_ignore_case(&options.ignored_headers, &name) {
                return Some((name, None));
            }
            Some((name, Some(value.trim())))
        })
        .collect();
    headers.sort_unstable();
    headers
}

fn contains_ignore_case(list: &[String], name: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(name))
}

/// Normalize a request URI for comparison
///
/// Scheme and authority are lowercased, the path gets a leading slash, the
/// fragment is dropped, and query parameters are percent-decoded, stripped of
/// ignored names, and sorted.
#[must_use]
pub fn normalize_uri(uri: &str, ignored_query_params: &[String]) -> String {
    let trimmed = uri.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or_default();

    let (prefix, rest) = match without_fragment.find("://") {
        Some(pos) => {
            let after_scheme = &without_fragment[pos + 3..];
            let authority_end = after_scheme
                .find(|c: char| c == '/' || c == '?')
                .unwrap_or(after_scheme.len());
            let prefix = format!(
                "{}://{}",
                without_fragment[..pos].to_ascii_lowercase(),
                after_scheme[..authority_end].to_ascii_lowercase()
            );
            (prefix, &after_scheme[authority_end..])
        }
        None => (String::new(), without_fragment),
    };

    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };

    let mut normalized = prefix;
    normalized.push_str(&normalize_path(path));

    let params = query_params_sorted(query, ignored_query_params);
    if !params.is_empty() {
        normalized.push('?');
        // Re-encode so a decoded '&' or '=' cannot forge another parameter
        let joined: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        normalized.push_str(&joined.join("&"));
    }

    normalized
}

/// Normalize a URL path
fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn query_params_sorted(query: Option<&str>, ignored: &[String]) -> Vec<(String, String)> {
    let Some(query) = query else {
        return Vec::new();
    };

    let mut params: Vec<(String, String)> = query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (name, value) = segment.split_once('=').unwrap_or((segment, ""));
            (decode_component(name), decode_component(value))
        })
        .filter(|(name, _)| !contains_ignore_case(ignored, name))
        .collect();
    params.sort_unstable();
    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(Cow::into_owned)
        .unwrap_or(spaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_request() -> RecordedRequest {
        RecordedRequest {
            method: "GET".to_string(),
            uri: "https://example.com/api/test".to_string(),
            headers: crate::entry::Headers::new(),
            body: vec![],
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let request = test_request();
        let options = MatchOptions::default();
        assert_eq!(
            fingerprint_request(&request, &options),
            fingerprint_request(&request, &options),
            "Fingerprint must be deterministic"
        );
    }

    #[test]
    fn test_fingerprint_method_case() {
        let mut lower = test_request();
        lower.method = "get".to_string();
        let options = MatchOptions::default();
        assert_eq!(
            fingerprint_request(&lower, &options),
            fingerprint_request(&test_request(), &options)
        );
    }

    #[test]
    fn test_fingerprint_different_paths() {
        let mut other = test_request();
        other.uri = "https://example.com/api/other".to_string();
        let options = MatchOptions::default();
        assert_ne!(
            fingerprint_request(&other, &options),
            fingerprint_request(&test_request(), &options)
        );
    }

    #[test]
    fn test_header_order_and_case_independence() {
        let mut req1 = test_request();
        req1.headers = [("Content-Type", "application/json"), ("Accept", "*/*")]
            .into_iter()
            .collect();
        let mut req2 = test_request();
        req2.headers = [("accept", "*/*"), ("content-type", "application/json")]
            .into_iter()
            .collect();

        let options = MatchOptions::default();
        assert_eq!(
            fingerprint_request(&req1, &options),
            fingerprint_request(&req2, &options)
        );
    }

    #[test]
    fn test_default_excluded_headers_do_not_matter() {
        let mut req1 = test_request();
        req1.headers = [("User-Agent", "sdk/1.0"), ("Date", "Mon")]
            .into_iter()
            .collect();
        let mut req2 = test_request();
        req2.headers = [("User-Agent", "sdk/2.0")].into_iter().collect();

        let options = MatchOptions::default();
        assert_eq!(
            fingerprint_request(&req1, &options),
            fingerprint_request(&req2, &options)
        );
    }

    #[test]
    fn test_ignored_header_must_be_present() {
        let options = MatchOptions {
            ignored_headers: vec!["X-Session".to_string()],
            ..MatchOptions::default()
        };

        let mut req1 = test_request();
        req1.headers = [("X-Session", "a")].into_iter().collect();
        let mut req2 = test_request();
        req2.headers = [("x-session", "b")].into_iter().collect();
        let req3 = test_request();

        assert_eq!(
            fingerprint_request(&req1, &options),
            fingerprint_request(&req2, &options)
        );
        assert_ne!(
            fingerprint_request(&req1, &options),
            fingerprint_request(&req3, &options)
        );
    }

    #[test]
    fn test_body_only_counts_when_compared() {
        let mut req1 = test_request();
        req1.body = b"one".to_vec();
        let mut req2 = test_request();
        req2.body = b"two".to_vec();

        assert_ne!(
            fingerprint_request(&req1, &MatchOptions::default()),
            fingerprint_request(&req2, &MatchOptions::default())
        );

        let bodiless = MatchOptions {
            compare_bodies: false,
            ..MatchOptions::default()
        };
        assert_eq!(
            fingerprint_request(&req1, &bodiless),
            fingerprint_request(&req2, &bodiless)
        );
    }

    #[test]
    fn test_uri_normalization() {
        assert_eq!(normalize_uri("/api/test", &[]), "/api/test");
        assert_eq!(normalize_uri("api/test", &[]), "/api/test");
        assert_eq!(normalize_uri("", &[]), "/");
        assert_eq!(
            normalize_uri("HTTPS://Example.COM/Path?b=2&a=1#frag", &[]),
            "https://example.com/Path?a=1&b=2"
        );
        assert_eq!(
            normalize_uri("https://example.com?x=%2fy", &[]),
            "https://example.com/?x=%2Fy"
        );
        assert_eq!(
            normalize_uri("/q?name=a+b", &[]),
            normalize_uri("/q?name=a%20b", &[])
        );
    }

    #[test]
    fn test_encoded_delimiters_stay_distinct() {
        assert_ne!(
            normalize_uri("/q?a=1%26b%3D", &[]),
            normalize_uri("/q?a=1&b=", &[])
        );

        let mut encoded = test_request();
        encoded.uri = "https://example.com/api/test?a=1%26b%3D".to_string();
        let mut split = test_request();
        split.uri = "https://example.com/api/test?a=1&b=".to_string();
        let options = MatchOptions::default();
        assert_ne!(
            fingerprint_request(&encoded, &options),
            fingerprint_request(&split, &options)
        );
    }

    #[test]
    fn test_ignored_query_params() {
        let ignored = vec!["api-version".to_string()];
        assert_eq!(
            normalize_uri("/items?api-version=2020&id=3", &ignored),
            normalize_uri("/items?id=3&api-version=2024", &ignored)
        );
    }

    #[test]
    fn test_short_hex() {
        assert_eq!(short_hex(&[0xab; 32]), "abababababababab");
    }
}
