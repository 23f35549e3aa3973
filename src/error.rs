//! Error types for Cassette

use std::io;
use thiserror::Error;

/// Result type for Cassette operations
pub type Result<T> = std::result::Result<T, CassetteError>;

/// Errors that can occur in Cassette
#[derive(Debug, Error)]
pub enum CassetteError {
    /// No unconsumed entry satisfied the matcher
    #[error("No recorded entry matches {method} {uri}{}", closest_suffix(.closest.as_deref()))]
    NoMatchFound {
        /// Request method of the unmatched request
        method: String,
        /// Request URI of the unmatched request
        uri: String,
        /// Description of the nearest candidate, if any existed
        closest: Option<String>,
    },

    /// More than one candidate qualified and the matcher disallows ties
    #[error("{count} recorded entries equally match {method} {uri}")]
    AmbiguousMatch {
        /// Request method of the ambiguous request
        method: String,
        /// Request URI of the ambiguous request
        uri: String,
        /// Number of equally-qualified candidates
        count: usize,
    },

    /// An index was assigned twice within one session
    #[error("Entry index {0} is already in use")]
    IndexConflict(u64),

    /// Malformed cassette document
    #[error("Invalid cassette: {0}")]
    Deserialization(String),

    /// A sanitizer failed; nothing it touched was committed
    #[error("Sanitizer '{sanitizer}' failed: {reason}")]
    Sanitization {
        /// Name of the failing sanitizer
        sanitizer: String,
        /// What went wrong
        reason: String,
    },

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid regular expression in a sanitizer rule
    #[error("Invalid regex: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

fn closest_suffix(closest: Option<&str>) -> String {
    closest.map_or_else(String::new, |c| format!(" (closest: {c})"))
}
