//! Sanitizers that scrub secrets from entries before they are persisted or
//! compared
//!
//! Every sanitizer is idempotent: running it on its own output changes
//! nothing. Recordings are routinely sanitized again by newer tool versions,
//! so this holds for the built-ins below and must hold for custom ones.

use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

use regex::{NoExpand, Regex};
use serde_json::Value;
use tracing::debug;

use crate::config::SanitizerConfig;
use crate::entry::{is_json_content, Entry, Headers};
use crate::session::{Session, Variables};
use crate::{CassetteError, Result};

/// Default replacement for sanitized values
pub const DEFAULT_REPLACEMENT: &str = "Sanitized";

/// A rule that removes or replaces sensitive data
///
/// Entry-scoped rules implement [`Sanitizer::sanitize_entry`] and get the
/// session behavior for free. Rules that need to see the whole session
/// override [`Sanitizer::sanitize_session`].
pub trait Sanitizer: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Scrub one entry in place
    ///
    /// # Errors
    ///
    /// Returns a `Sanitization` error if the rule cannot be applied
    fn sanitize_entry(&self, _entry: &mut Entry, _variables: &Variables) -> Result<()> {
        Ok(())
    }

    /// Scrub a whole session
    ///
    /// The default applies [`Sanitizer::sanitize_entry`] to every unremoved
    /// entry and stores the results only if all of them succeed.
    ///
    /// # Errors
    ///
    /// Returns a `Sanitization` error if the rule cannot be applied
    fn sanitize_session(&self, session: &Session) -> Result<()> {
        session.rewrite_entries(|entries, variables| {
            entries
                .iter_mut()
                .try_for_each(|entry| self.sanitize_entry(entry, variables))
        })
    }
}

/// Ordered list of sanitizers
#[derive(Clone, Default)]
pub struct SanitizerPipeline {
    sanitizers: Vec<Arc<dyn Sanitizer>>,
}

impl SanitizerPipeline {
    /// Create an empty pipeline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pipeline from configuration, in configured order
    ///
    /// # Errors
    ///
    /// Returns error if a rule is invalid (e.g. a regex does not compile)
    pub fn from_config(configs: &[SanitizerConfig]) -> Result<Self> {
        let mut pipeline = Self::new();
        for config in configs {
            pipeline.push(build_sanitizer(config)?);
        }
        Ok(pipeline)
    }

    /// Append a sanitizer
    pub fn push(&mut self, sanitizer: Arc<dyn Sanitizer>) {
        self.sanitizers.push(sanitizer);
    }

    /// Append a sanitizer, builder style
    #[must_use]
    pub fn with(mut self, sanitizer: impl Sanitizer + 'static) -> Self {
        self.push(Arc::new(sanitizer));
        self
    }

    /// Sanitizers in application order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Sanitizer>> {
        self.sanitizers.iter()
    }

    /// Number of sanitizers
    #[must_use]
    pub fn len(&self) -> usize {
        self.sanitizers.len()
    }

    /// Whether the pipeline is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sanitizers.is_empty()
    }

    /// Run every entry-scoped rule over one entry
    ///
    /// The rules run on a copy that replaces `entry` only if all of them
    /// succeed.
    ///
    /// # Errors
    ///
    /// Returns the first sanitizer error
    pub fn apply_entry(&self, entry: &mut Entry, variables: &Variables) -> Result<()> {
        if self.sanitizers.is_empty() {
            return Ok(());
        }
        let mut working = entry.clone();
        for sanitizer in &self.sanitizers {
            sanitizer.sanitize_entry(&mut working, variables)?;
        }
        *entry = working;
        Ok(())
    }
}

impl std::fmt::Debug for SanitizerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.sanitizers.iter().map(|s| s.name()))
            .finish()
    }
}

fn build_sanitizer(config: &SanitizerConfig) -> Result<Arc<dyn Sanitizer>> {
    let sanitizer: Arc<dyn Sanitizer> = match config {
        SanitizerConfig::HeaderRegex {
            key,
            regex,
            group,
            value,
        } => Arc::new(HeaderRegexSanitizer::new(
            key,
            regex.as_deref(),
            group.as_deref(),
            value,
        )?),
        SanitizerConfig::UriRegex {
            regex,
            group,
            value,
        } => Arc::new(UriRegexSanitizer::new(regex, group.as_deref(), value)?),
        SanitizerConfig::BodyRegex {
            regex,
            group,
            value,
        } => Arc::new(BodyRegexSanitizer::new(regex, group.as_deref(), value)?),
        SanitizerConfig::GeneralRegex {
            regex,
            group,
            value,
        } => Arc::new(GeneralRegexSanitizer::new(regex, group.as_deref(), value)?),
        SanitizerConfig::RemoveHeader { headers } => {
            Arc::new(RemoveHeaderSanitizer::new(headers))
        }
        SanitizerConfig::BodyKey { keys, value } => Arc::new(BodyKeySanitizer::new(keys, value)),
        SanitizerConfig::OauthResponse => Arc::new(OAuthResponseSanitizer),
        SanitizerConfig::Continuation {
            header,
            replacement,
        } => Arc::new(ContinuationSanitizer::new(header, replacement)),
    };
    Ok(sanitizer)
}

/// Resolve `${name}` references against session variables
fn resolve_value<'a>(
    value: &'a str,
    variables: &Variables,
    sanitizer: &str,
) -> Result<Cow<'a, str>> {
    if !value.contains("${") {
        return Ok(Cow::Borrowed(value));
    }

    let mut missing = None;
    let resolved = variable_reference().replace_all(value, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        variables.get(name).map_or_else(
            || {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            },
            str::to_string,
        )
    });

    match missing {
        Some(name) => Err(CassetteError::Sanitization {
            sanitizer: sanitizer.to_string(),
            reason: format!("unknown variable '{name}'"),
        }),
        None => Ok(Cow::Owned(resolved.into_owned())),
    }
}

fn variable_reference() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z0-9_.-]+)\}").expect("variable reference regex should compile")
    })
}

/// Regex plus replacement shared by the regex-based sanitizers
#[derive(Debug, Clone)]
struct RegexRule {
    regex: Regex,
    group: Option<String>,
    value: String,
}

impl RegexRule {
    fn new(pattern: &str, group: Option<&str>, value: &str) -> Result<Self> {
        let regex = Regex::new(pattern)?;
        if let Some(group) = group {
            let known = match group.parse::<usize>() {
                Ok(n) => n < regex.captures_len(),
                Err(_) => regex.capture_names().flatten().any(|name| name == group),
            };
            if !known {
                return Err(CassetteError::ConfigError(format!(
                    "regex '{pattern}' has no group '{group}'"
                )));
            }
        }
        Ok(Self {
            regex,
            group: group.map(str::to_string),
            value: value.to_string(),
        })
    }

    fn apply<'t>(&self, text: &'t str, replacement: &str) -> Cow<'t, str> {
        let Some(group) = &self.group else {
            return self.regex.replace_all(text, NoExpand(replacement));
        };

        let mut out = String::new();
        let mut last = 0;
        for caps in self.regex.captures_iter(text) {
            let m = match group.parse::<usize>() {
                Ok(n) => caps.get(n),
                Err(_) => caps.name(group),
            };
            if let Some(m) = m {
                out.push_str(&text[last..m.start()]);
                out.push_str(replacement);
                last = m.end();
            }
        }
        if last == 0 && out.is_empty() {
            return Cow::Borrowed(text);
        }
        out.push_str(&text[last..]);
        Cow::Owned(out)
    }

    fn apply_string(&self, target: &mut String, replacement: &str) {
        if let Cow::Owned(updated) = self.apply(target, replacement) {
            *target = updated;
        }
    }

    fn apply_body(&self, body: &mut Vec<u8>, replacement: &str) {
        // Binary bodies are left alone
        let Ok(text) = std::str::from_utf8(body) else {
            return;
        };
        if let Cow::Owned(updated) = self.apply(text, replacement) {
            *body = updated.into_bytes();
        }
    }
}

/// Replaces a header's value, or the regex matches within it
#[derive(Debug, Clone)]
pub struct HeaderRegexSanitizer {
    key: String,
    rule: Option<RegexRule>,
    value: String,
}

impl HeaderRegexSanitizer {
    /// Sanitize header `key` (case-insensitive)
    ///
    /// Without a regex the whole value is replaced.
    ///
    /// # Errors
    ///
    /// Returns error if the regex is invalid or lacks `group`
    pub fn new(key: &str, regex: Option<&str>, group: Option<&str>, value: &str) -> Result<Self> {
        let rule = regex
            .map(|pattern| RegexRule::new(pattern, group, value))
            .transpose()?;
        Ok(Self {
            key: key.to_string(),
            rule,
            value: value.to_string(),
        })
    }

    fn sanitize_headers(&self, headers: &mut Headers, replacement: &str) {
        for (name, value) in headers.iter_mut() {
            if !name.eq_ignore_ascii_case(&self.key) {
                continue;
            }
            match &self.rule {
                Some(rule) => rule.apply_string(value, replacement),
                None => replacement.clone_into(value),
            }
        }
    }
}

impl Sanitizer for HeaderRegexSanitizer {
    fn name(&self) -> &str {
        "header-regex"
    }

    fn sanitize_entry(&self, entry: &mut Entry, variables: &Variables) -> Result<()> {
        let replacement = resolve_value(&self.value, variables, self.name())?;
        self.sanitize_headers(&mut entry.request.headers, &replacement);
        self.sanitize_headers(&mut entry.response.headers, &replacement);
        Ok(())
    }
}

/// Rewrites the request URI
#[derive(Debug, Clone)]
pub struct UriRegexSanitizer {
    rule: RegexRule,
}

impl UriRegexSanitizer {
    /// # Errors
    ///
    /// Returns error if the regex is invalid or lacks `group`
    pub fn new(regex: &str, group: Option<&str>, value: &str) -> Result<Self> {
        Ok(Self {
            rule: RegexRule::new(regex, group, value)?,
        })
    }
}

impl Sanitizer for UriRegexSanitizer {
    fn name(&self) -> &str {
        "uri-regex"
    }

    fn sanitize_entry(&self, entry: &mut Entry, variables: &Variables) -> Result<()> {
        let replacement = resolve_value(&self.rule.value, variables, self.name())?;
        self.rule.apply_string(&mut entry.request.uri, &replacement);
        Ok(())
    }
}

/// Rewrites text request and response bodies
#[derive(Debug, Clone)]
pub struct BodyRegexSanitizer {
    rule: RegexRule,
}

impl BodyRegexSanitizer {
    /// # Errors
    ///
    /// Returns error if the regex is invalid or lacks `group`
    pub fn new(regex: &str, group: Option<&str>, value: &str) -> Result<Self> {
        Ok(Self {
            rule: RegexRule::new(regex, group, value)?,
        })
    }
}

impl Sanitizer for BodyRegexSanitizer {
    fn name(&self) -> &str {
        "body-regex"
    }

    fn sanitize_entry(&self, entry: &mut Entry, variables: &Variables) -> Result<()> {
        let replacement = resolve_value(&self.rule.value, variables, self.name())?;
        self.rule.apply_body(&mut entry.request.body, &replacement);
        self.rule.apply_body(&mut entry.response.body, &replacement);
        Ok(())
    }
}

/// Rewrites the URI, every header value, and text bodies
#[derive(Debug, Clone)]
pub struct GeneralRegexSanitizer {
    rule: RegexRule,
}

impl GeneralRegexSanitizer {
    /// # Errors
    ///
    /// Returns error if the regex is invalid or lacks `group`
    pub fn new(regex: &str, group: Option<&str>, value: &str) -> Result<Self> {
        Ok(Self {
            rule: RegexRule::new(regex, group, value)?,
        })
    }
}

impl Sanitizer for GeneralRegexSanitizer {
    fn name(&self) -> &str {
        "general-regex"
    }

    fn sanitize_entry(&self, entry: &mut Entry, variables: &Variables) -> Result<()> {
        let replacement = resolve_value(&self.rule.value, variables, self.name())?;
        self.rule.apply_string(&mut entry.request.uri, &replacement);
        for headers in [&mut entry.request.headers, &mut entry.response.headers] {
            for (_, value) in headers.iter_mut() {
                self.rule.apply_string(value, &replacement);
            }
        }
        self.rule.apply_body(&mut entry.request.body, &replacement);
        self.rule.apply_body(&mut entry.response.body, &replacement);
        Ok(())
    }
}

/// Drops headers from requests and responses
#[derive(Debug, Clone)]
pub struct RemoveHeaderSanitizer {
    headers: Vec<String>,
}

impl RemoveHeaderSanitizer {
    /// `headers` is a comma-separated list of header names
    #[must_use]
    pub fn new(headers: &str) -> Self {
        Self {
            headers: headers
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

impl Sanitizer for RemoveHeaderSanitizer {
    fn name(&self) -> &str {
        "remove-header"
    }

    fn sanitize_entry(&self, entry: &mut Entry, _variables: &Variables) -> Result<()> {
        for name in &self.headers {
            entry.request.headers.remove_ignore_case(name);
            entry.response.headers.remove_ignore_case(name);
        }
        Ok(())
    }
}

/// Replaces the values of named keys anywhere in JSON bodies
#[derive(Debug, Clone)]
pub struct BodyKeySanitizer {
    keys: Vec<String>,
    value: String,
}

impl BodyKeySanitizer {
    /// Keys compare case-insensitively
    #[must_use]
    pub fn new(keys: &[String], value: &str) -> Self {
        Self {
            keys: keys.to_vec(),
            value: value.to_string(),
        }
    }

    fn scrub_body(&self, headers: &Headers, body: &mut Vec<u8>, replacement: &str) {
        if body.is_empty() || !is_json_content(headers) {
            return;
        }
        let Ok(mut parsed) = serde_json::from_slice::<Value>(body) else {
            return;
        };
        if !self.scrub_value(&mut parsed, replacement) {
            return;
        }
        if let Ok(updated) = serde_json::to_vec(&parsed) {
            *body = updated;
        }
    }

    fn scrub_value(&self, value: &mut Value, replacement: &str) -> bool {
        match value {
            Value::Object(map) => {
                let mut changed = false;
                for (key, nested) in map.iter_mut() {
                    if self.keys.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                        let sanitized = Value::String(replacement.to_string());
                        if *nested != sanitized {
                            *nested = sanitized;
                            changed = true;
                        }
                        continue;
                    }
                    changed |= self.scrub_value(nested, replacement);
                }
                changed
            }
            Value::Array(values) => {
                let mut changed = false;
                for nested in values {
                    changed |= self.scrub_value(nested, replacement);
                }
                changed
            }
            _ => false,
        }
    }
}

impl Sanitizer for BodyKeySanitizer {
    fn name(&self) -> &str {
        "body-key"
    }

    fn sanitize_entry(&self, entry: &mut Entry, variables: &Variables) -> Result<()> {
        let replacement = resolve_value(&self.value, variables, self.name())?;
        self.scrub_body(&entry.request.headers, &mut entry.request.body, &replacement);
        self.scrub_body(
            &entry.response.headers,
            &mut entry.response.body,
            &replacement,
        );
        Ok(())
    }
}

/// Drops OAuth2 token exchanges from the session
///
/// Token responses carry live credentials and are never replayed, so the
/// entries are marked removed rather than rewritten.
#[derive(Debug, Clone, Copy, Default)]
pub struct OAuthResponseSanitizer;

fn oauth_token_path() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)/oauth2(?:/v2\.0)?/token").expect("oauth token regex should compile")
    })
}

impl Sanitizer for OAuthResponseSanitizer {
    fn name(&self) -> &str {
        "oauth-response"
    }

    fn sanitize_session(&self, session: &Session) -> Result<()> {
        let mut removed = 0;
        for entry in session.entries() {
            if oauth_token_path().is_match(&entry.request.uri) {
                session.remove(&entry);
                removed += 1;
            }
        }
        debug!("Removed {} OAuth token entries", removed);
        Ok(())
    }
}

/// Replaces a continuation token returned in a response header and echoed
/// back in later requests
#[derive(Debug, Clone)]
pub struct ContinuationSanitizer {
    header: String,
    replacement: String,
}

impl ContinuationSanitizer {
    /// Sanitize header `header` (case-insensitive)
    #[must_use]
    pub fn new(header: &str, replacement: &str) -> Self {
        Self {
            header: header.to_string(),
            replacement: replacement.to_string(),
        }
    }
}

impl Sanitizer for ContinuationSanitizer {
    fn name(&self) -> &str {
        "continuation"
    }

    fn sanitize_session(&self, session: &Session) -> Result<()> {
        session.rewrite_entries(|entries, _| {
            let mut issued: Vec<String> = Vec::new();
            for entry in entries.iter_mut() {
                for (name, value) in entry.request.headers.iter_mut() {
                    if name.eq_ignore_ascii_case(&self.header) && issued.contains(value) {
                        self.replacement.clone_into(value);
                    }
                }
                for (name, value) in entry.response.headers.iter_mut() {
                    if name.eq_ignore_ascii_case(&self.header) {
                        issued.push(std::mem::replace(value, self.replacement.clone()));
                    }
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{RecordedRequest, RecordedResponse};

    fn entry(uri: &str) -> Entry {
        Entry::new(
            RecordedRequest {
                method: "POST".to_string(),
                uri: uri.to_string(),
                headers: [
                    ("Authorization", "Bearer abc.def"),
                    ("Content-Type", "application/json"),
                ]
                .into_iter()
                .collect(),
                body: br#"{"user":"me","password":"hunter2","nested":[{"Secret":"x"}]}"#.to_vec(),
            },
            RecordedResponse {
                status: 200,
                headers: [("Content-Type", "application/json")].into_iter().collect(),
                body: br#"{"token":"tok-123"}"#.to_vec(),
            },
        )
    }

    fn apply_twice(sanitizer: &dyn Sanitizer, entry: &mut Entry) -> Entry {
        let variables = Variables::new();
        sanitizer.sanitize_entry(entry, &variables).unwrap();
        let once = entry.clone();
        sanitizer.sanitize_entry(entry, &variables).unwrap();
        assert_eq!(*entry, once, "sanitizer '{}' is not idempotent", sanitizer.name());
        once
    }

    #[test]
    fn test_header_sanitizer_replaces_whole_value() {
        let sanitizer =
            HeaderRegexSanitizer::new("authorization", None, None, "Sanitized").unwrap();
        let sanitized = apply_twice(&sanitizer, &mut entry("/a"));
        assert_eq!(
            sanitized.request.headers.get("Authorization"),
            Some("Sanitized")
        );
    }

    #[test]
    fn test_header_sanitizer_with_group() {
        let sanitizer = HeaderRegexSanitizer::new(
            "Authorization",
            Some(r"Bearer (?P<token>\S+)"),
            Some("token"),
            "REDACTED",
        )
        .unwrap();
        let sanitized = apply_twice(&sanitizer, &mut entry("/a"));
        assert_eq!(
            sanitized.request.headers.get("Authorization"),
            Some("Bearer REDACTED")
        );
    }

    #[test]
    fn test_unknown_group_is_rejected() {
        assert!(UriRegexSanitizer::new("abc", Some("missing"), "x").is_err());
        assert!(UriRegexSanitizer::new("a(b)c", Some("2"), "x").is_err());
        assert!(UriRegexSanitizer::new("a(b)c", Some("1"), "x").is_ok());
    }

    #[test]
    fn test_uri_sanitizer() {
        let sanitizer =
            UriRegexSanitizer::new(r"https://[a-z0-9]+\.vault", None, "https://fake.vault")
                .unwrap();
        let sanitized = apply_twice(&sanitizer, &mut entry("https://myvault123.vault.io/keys"));
        assert_eq!(sanitized.request.uri, "https://fake.vault.io/keys");
    }

    #[test]
    fn test_body_regex_sanitizer() {
        let sanitizer = BodyRegexSanitizer::new(r"tok-\d+", None, "tok-0").unwrap();
        let sanitized = apply_twice(&sanitizer, &mut entry("/a"));
        assert_eq!(sanitized.response.body, br#"{"token":"tok-0"}"#);
    }

    #[test]
    fn test_body_regex_skips_binary() {
        let sanitizer = BodyRegexSanitizer::new(".", None, "x").unwrap();
        let mut e = entry("/a");
        e.response.body = vec![0xff, 0xfe, 0x00];
        apply_twice(&sanitizer, &mut e);
        assert_eq!(e.response.body, vec![0xff, 0xfe, 0x00]);
    }

    #[test]
    fn test_general_regex_sanitizer() {
        let sanitizer = GeneralRegexSanitizer::new("abc", None, "zzz").unwrap();
        let sanitized = apply_twice(&sanitizer, &mut entry("/abc"));
        assert_eq!(sanitized.request.uri, "/zzz");
        assert_eq!(
            sanitized.request.headers.get("Authorization"),
            Some("Bearer zzz.def")
        );
    }

    #[test]
    fn test_remove_header_sanitizer() {
        let sanitizer = RemoveHeaderSanitizer::new("authorization, X-Missing");
        let sanitized = apply_twice(&sanitizer, &mut entry("/a"));
        assert!(sanitized.request.headers.get("Authorization").is_none());
        assert_eq!(sanitized.request.headers.len(), 1);
    }

    #[test]
    fn test_body_key_sanitizer() {
        let sanitizer = BodyKeySanitizer::new(
            &["password".to_string(), "secret".to_string(), "token".to_string()],
            "Sanitized",
        );
        let sanitized = apply_twice(&sanitizer, &mut entry("/a"));
        assert_eq!(
            sanitized.request.body,
            br#"{"user":"me","password":"Sanitized","nested":[{"Secret":"Sanitized"}]}"#
        );
        assert_eq!(sanitized.response.body, br#"{"token":"Sanitized"}"#);
    }

    #[test]
    fn test_variable_replacement() {
        let sanitizer = UriRegexSanitizer::new(r"\d{4}-\d{2}-\d{2}", None, "${Today}").unwrap();
        let variables: Variables = [("today", "2020-01-01")].into_iter().collect();

        let mut e = entry("/reports/2024-06-30");
        sanitizer.sanitize_entry(&mut e, &variables).unwrap();
        assert_eq!(e.request.uri, "/reports/2020-01-01");
    }

    #[test]
    fn test_unknown_variable_fails() {
        let sanitizer = UriRegexSanitizer::new("a", None, "${nope}").unwrap();
        let err = sanitizer
            .sanitize_entry(&mut entry("/a"), &Variables::new())
            .unwrap_err();
        assert!(matches!(err, CassetteError::Sanitization { .. }));
    }

    #[test]
    fn test_pipeline_failure_leaves_entry_untouched() {
        let pipeline = SanitizerPipeline::new()
            .with(UriRegexSanitizer::new("a", None, "b").unwrap())
            .with(UriRegexSanitizer::new("b", None, "${nope}").unwrap());

        let mut e = entry("/a");
        assert!(pipeline.apply_entry(&mut e, &Variables::new()).is_err());
        assert_eq!(e.request.uri, "/a");
    }

    #[test]
    fn test_pipeline_runs_in_order() {
        let pipeline = SanitizerPipeline::new()
            .with(UriRegexSanitizer::new("a", None, "b").unwrap())
            .with(UriRegexSanitizer::new("b", None, "c").unwrap());

        let mut e = entry("/a");
        pipeline.apply_entry(&mut e, &Variables::new()).unwrap();
        assert_eq!(e.request.uri, "/c");
        assert_eq!(format!("{pipeline:?}"), r#"["uri-regex", "uri-regex"]"#);
    }

    #[test]
    fn test_oauth_sanitizer_removes_token_calls() {
        let session = Session::new();
        session
            .record(entry("https://login.example.com/tenant/oauth2/v2.0/token"))
            .unwrap();
        session.record(entry("https://api.example.com/items")).unwrap();

        session.sanitize(&OAuthResponseSanitizer).unwrap();
        session.sanitize(&OAuthResponseSanitizer).unwrap();

        let remaining = session.entries();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].request.uri, "https://api.example.com/items");
    }

    #[test]
    fn test_continuation_sanitizer() {
        let session = Session::new();
        let mut first = entry("/page/1");
        first.response.headers.insert("x-ms-continuation", "ct-1");
        let mut second = entry("/page/2");
        second.request.headers.insert("x-ms-continuation", "ct-1");
        second.response.headers.insert("x-ms-continuation", "ct-2");
        let mut third = entry("/page/3");
        third.request.headers.insert("x-ms-continuation", "ct-2");
        third.request.headers.insert("x-other", "ct-2");
        for e in [first, second, third] {
            session.record(e).unwrap();
        }

        let sanitizer = ContinuationSanitizer::new("X-MS-Continuation", "Sanitized");
        session.sanitize(&sanitizer).unwrap();
        let once = session.entries();
        session.sanitize(&sanitizer).unwrap();
        assert_eq!(session.entries(), once);

        assert_eq!(
            once[0].response.headers.get("x-ms-continuation"),
            Some("Sanitized")
        );
        assert_eq!(
            once[1].request.headers.get("x-ms-continuation"),
            Some("Sanitized")
        );
        assert_eq!(
            once[2].request.headers.get("x-ms-continuation"),
            Some("Sanitized")
        );
        assert_eq!(once[2].request.headers.get("x-other"), Some("ct-2"));
    }

    #[test]
    fn test_session_sanitize_skips_removed_entries() {
        let session = Session::new();
        session.record(entry("/keep")).unwrap();
        let gone = session.record(entry("/gone")).unwrap();
        session.remove(&session.entry(gone).unwrap());

        let sanitizer =
            HeaderRegexSanitizer::new("Authorization", None, None, "Sanitized").unwrap();
        session.sanitize(&sanitizer).unwrap();

        assert_eq!(
            session.entry(0).unwrap().request.headers.get("Authorization"),
            Some("Sanitized")
        );
        assert_eq!(
            session.entry(gone).unwrap().request.headers.get("Authorization"),
            Some("Bearer abc.def")
        );
    }

    #[test]
    fn test_pipeline_from_config() {
        let configs: Vec<SanitizerConfig> = toml::from_str::<crate::config::Config>(
            r#"
            [[sanitizers]]
            kind = "remove-header"
            headers = "Authorization"

            [[sanitizers]]
            kind = "body-key"
            keys = ["password"]

            [[sanitizers]]
            kind = "oauth-response"
        "#,
        )
        .unwrap()
        .sanitizers;

        let pipeline = SanitizerPipeline::from_config(&configs).unwrap();
        assert_eq!(pipeline.len(), 3);
    }
}
