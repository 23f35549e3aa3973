//! Replay matching strategies

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::{Entry, RecordedRequest};
use crate::fingerprint::{fingerprint_request, normalize_uri, normalized_headers, short_hex};
use crate::{CassetteError, Result};

/// Strategy that selects the recorded entry answering a replayed request
///
/// Implementations must treat candidates as read-only and return the same
/// entry for the same request and candidate set every time.
pub trait Matcher: Send + Sync {
    /// Find the candidate matching `request`
    ///
    /// # Errors
    ///
    /// Returns `NoMatchFound` if no candidate qualifies, or `AmbiguousMatch`
    /// if the strategy refuses to break a tie
    fn find_match<'a>(&self, request: &Entry, candidates: &[&'a Entry]) -> Result<&'a Entry>;
}

/// What to do when several candidates qualify equally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TiePolicy {
    /// Return the candidate with the lowest index
    #[default]
    LowestIndex,
    /// Fail with `AmbiguousMatch`
    Reject,
}

/// Dimensions compared by [`DefaultMatcher`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// Compare request bodies byte-for-byte
    pub compare_bodies: bool,
    /// Compare request headers
    pub compare_headers: bool,
    /// Headers left out of the comparison entirely
    pub excluded_headers: Vec<String>,
    /// Headers that must be present on both sides but whose values may differ
    pub ignored_headers: Vec<String>,
    /// Query parameters left out of the URI comparison
    pub ignored_query_params: Vec<String>,
    /// Tie-breaking rule
    pub tie_policy: TiePolicy,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            compare_bodies: true,
            compare_headers: true,
            excluded_headers: Vec::new(),
            ignored_headers: Vec::new(),
            ignored_query_params: Vec::new(),
            tie_policy: TiePolicy::LowestIndex,
        }
    }
}

/// Matches on method, normalized URI, selected headers and, optionally, body
#[derive(Debug, Clone, Default)]
pub struct DefaultMatcher {
    options: MatchOptions,
}

impl DefaultMatcher {
    /// Create a matcher with the given options
    #[must_use]
    pub fn new(options: MatchOptions) -> Self {
        Self { options }
    }

    /// Matcher that ignores request bodies
    #[must_use]
    pub fn bodiless() -> Self {
        Self::new(MatchOptions {
            compare_bodies: false,
            ..MatchOptions::default()
        })
    }

    /// Matcher that ignores request headers
    #[must_use]
    pub fn headerless() -> Self {
        Self::new(MatchOptions {
            compare_headers: false,
            ..MatchOptions::default()
        })
    }

    /// Options in effect
    #[must_use]
    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    /// Names of the dimensions in which two requests disagree
    fn differences(&self, a: &RecordedRequest, b: &RecordedRequest) -> Vec<&'static str> {
        let mut diffs = Vec::new();
        if !a.method.eq_ignore_ascii_case(&b.method) {
            diffs.push("method");
        }
        let ignored = &self.options.ignored_query_params;
        if normalize_uri(&a.uri, ignored) != normalize_uri(&b.uri, ignored) {
            diffs.push("uri");
        }
        if normalized_headers(a, &self.options) != normalized_headers(b, &self.options) {
            diffs.push("headers");
        }
        if self.options.compare_bodies && a.body != b.body {
            diffs.push("body");
        }
        diffs
    }

    fn closest(&self, request: &RecordedRequest, candidates: &[&Entry]) -> Option<String> {
        candidates
            .iter()
            .map(|c| (self.differences(request, &c.request), c))
            .min_by_key(|(diffs, c)| (diffs.len(), c.index))
            .map(|(diffs, c)| {
                format!(
                    "#{} {} {} differs in {}",
                    c.index,
                    c.request.method,
                    c.request.uri,
                    diffs.join(", ")
                )
            })
    }
}

impl Matcher for DefaultMatcher {
    fn find_match<'a>(&self, request: &Entry, candidates: &[&'a Entry]) -> Result<&'a Entry> {
        let key = fingerprint_request(&request.request, &self.options);

        let mut matches: Vec<&'a Entry> = candidates
            .iter()
            .copied()
            .filter(|c| fingerprint_request(&c.request, &self.options) == key)
            .collect();
        matches.sort_by_key(|c| c.index);

        debug!(
            "Matching {} {} (key: {}): {} of {} candidates qualify",
            request.request.method,
            request.request.uri,
            short_hex(&key),
            matches.len(),
            candidates.len()
        );

        match (matches.first(), self.options.tie_policy) {
            (None, _) => Err(CassetteError::NoMatchFound {
                method: request.request.method.clone(),
                uri: request.request.uri.clone(),
                closest: self.closest(&request.request, candidates),
            }),
            (Some(_), TiePolicy::Reject) if matches.len() > 1 => {
                Err(CassetteError::AmbiguousMatch {
                    method: request.request.method.clone(),
                    uri: request.request.uri.clone(),
                    count: matches.len(),
                })
            }
            (Some(first), _) => Ok(*first),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::RecordedResponse;

    fn entry(index: u64, method: &str, uri: &str, body: &[u8]) -> Entry {
        let mut entry = Entry::new(
            RecordedRequest {
                method: method.to_string(),
                uri: uri.to_string(),
                headers: [("Accept", "application/json")].into_iter().collect(),
                body: body.to_vec(),
            },
            RecordedResponse {
                status: 200,
                ..RecordedResponse::default()
            },
        );
        entry.index = index;
        entry
    }

    fn refs(entries: &[Entry]) -> Vec<&Entry> {
        entries.iter().collect()
    }

    #[test]
    fn test_exact_match() {
        let candidates = vec![entry(0, "GET", "/a", b""), entry(1, "GET", "/b", b"")];
        let request = entry(99, "GET", "/b", b"");

        let found = DefaultMatcher::default()
            .find_match(&request, &refs(&candidates))
            .unwrap();
        assert_eq!(found.index, 1);
    }

    #[test]
    fn test_no_candidates() {
        let request = entry(0, "GET", "/a", b"");
        let err = DefaultMatcher::default()
            .find_match(&request, &[])
            .unwrap_err();
        assert!(matches!(
            err,
            CassetteError::NoMatchFound { closest: None, .. }
        ));
    }

    #[test]
    fn test_miss_reports_closest_candidate() {
        let candidates = vec![
            entry(0, "POST", "/other", b"x"),
            entry(1, "GET", "/items", b"x"),
        ];
        let request = entry(9, "GET", "/items", b"y");

        let err = DefaultMatcher::default()
            .find_match(&request, &refs(&candidates))
            .unwrap_err();
        match err {
            CassetteError::NoMatchFound {
                method,
                uri,
                closest,
            } => {
                assert_eq!(method, "GET");
                assert_eq!(uri, "/items");
                assert_eq!(closest.as_deref(), Some("#1 GET /items differs in body"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_tie_goes_to_lowest_index() {
        let candidates = vec![
            entry(7, "GET", "/a", b""),
            entry(3, "GET", "/a", b""),
            entry(5, "GET", "/a", b""),
        ];
        let request = entry(0, "GET", "/a", b"");

        let found = DefaultMatcher::default()
            .find_match(&request, &refs(&candidates))
            .unwrap();
        assert_eq!(found.index, 3);
    }

    #[test]
    fn test_tie_rejected() {
        let matcher = DefaultMatcher::new(MatchOptions {
            tie_policy: TiePolicy::Reject,
            ..MatchOptions::default()
        });
        let candidates = vec![entry(0, "GET", "/a", b""), entry(1, "GET", "/a", b"")];

        let err = matcher
            .find_match(&entry(0, "GET", "/a", b""), &refs(&candidates))
            .unwrap_err();
        assert!(matches!(err, CassetteError::AmbiguousMatch { count: 2, .. }));
    }

    #[test]
    fn test_bodiless_ignores_body() {
        let candidates = vec![entry(0, "POST", "/a", b"recorded")];
        let request = entry(0, "POST", "/a", b"replayed");

        assert!(DefaultMatcher::default()
            .find_match(&request, &refs(&candidates))
            .is_err());
        assert!(DefaultMatcher::bodiless()
            .find_match(&request, &refs(&candidates))
            .is_ok());
    }

    #[test]
    fn test_headerless_ignores_headers() {
        let candidates = vec![entry(0, "GET", "/a", b"")];
        let mut request = entry(0, "GET", "/a", b"");
        request.request.headers.insert("Accept", "text/plain");

        assert!(DefaultMatcher::default()
            .find_match(&request, &refs(&candidates))
            .is_err());
        assert!(DefaultMatcher::headerless()
            .find_match(&request, &refs(&candidates))
            .is_ok());
    }

    #[test]
    fn test_options_parse_from_toml() {
        let options: MatchOptions = toml::from_str(
            r#"
            compare_bodies = false
            ignored_query_params = ["api-version"]
            tie_policy = "reject"
        "#,
        )
        .unwrap();
        assert!(!options.compare_bodies);
        assert!(options.compare_headers);
        assert_eq!(options.tie_policy, TiePolicy::Reject);
    }
}
