//! Configuration types for Cassette

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::matcher::{DefaultMatcher, MatchOptions};
use crate::sanitizer::{SanitizerPipeline, DEFAULT_REPLACEMENT};
use crate::{CassetteError, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Matching options for replay
    #[serde(default)]
    pub matcher: MatchOptions,
    /// Sanitizers, applied in the listed order
    #[serde(default)]
    pub sanitizers: Vec<SanitizerConfig>,
}

/// One sanitizer rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SanitizerConfig {
    /// Replace a header value, or the regex matches within it
    HeaderRegex {
        /// Header name (case-insensitive)
        key: String,
        /// Pattern to replace; the whole value when absent
        #[serde(default)]
        regex: Option<String>,
        /// Capture group (name or number) to replace instead of the match
        #[serde(default)]
        group: Option<String>,
        /// Replacement, may reference `${variable}`
        #[serde(default = "default_value")]
        value: String,
    },
    /// Rewrite request URIs
    UriRegex {
        /// Pattern to replace
        regex: String,
        /// Capture group (name or number) to replace instead of the match
        #[serde(default)]
        group: Option<String>,
        /// Replacement, may reference `${variable}`
        #[serde(default = "default_value")]
        value: String,
    },
    /// Rewrite text bodies
    BodyRegex {
        /// Pattern to replace
        regex: String,
        /// Capture group (name or number) to replace instead of the match
        #[serde(default)]
        group: Option<String>,
        /// Replacement, may reference `${variable}`
        #[serde(default = "default_value")]
        value: String,
    },
    /// Rewrite URIs, header values, and text bodies
    GeneralRegex {
        /// Pattern to replace
        regex: String,
        /// Capture group (name or number) to replace instead of the match
        #[serde(default)]
        group: Option<String>,
        /// Replacement, may reference `${variable}`
        #[serde(default = "default_value")]
        value: String,
    },
    /// Drop headers
    RemoveHeader {
        /// Comma-separated header names
        headers: String,
    },
    /// Replace values of JSON keys at any depth
    BodyKey {
        /// Key names (case-insensitive)
        keys: Vec<String>,
        /// Replacement, may reference `${variable}`
        #[serde(default = "default_value")]
        value: String,
    },
    /// Drop OAuth2 token exchanges
    OauthResponse,
    /// Replace continuation tokens issued in responses and echoed in requests
    Continuation {
        /// Header carrying the token
        header: String,
        /// Replacement token
        #[serde(default = "default_value")]
        replacement: String,
    },
}

fn default_value() -> String {
    DEFAULT_REPLACEMENT.to_string()
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CassetteError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| CassetteError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        for (i, sanitizer) in self.sanitizers.iter().enumerate() {
            let blank = match sanitizer {
                SanitizerConfig::HeaderRegex { key, .. } => key.trim().is_empty(),
                SanitizerConfig::UriRegex { regex, .. }
                | SanitizerConfig::BodyRegex { regex, .. }
                | SanitizerConfig::GeneralRegex { regex, .. } => regex.is_empty(),
                SanitizerConfig::RemoveHeader { headers } => headers.trim().is_empty(),
                SanitizerConfig::BodyKey { keys, .. } => keys.is_empty(),
                SanitizerConfig::OauthResponse => false,
                SanitizerConfig::Continuation { header, .. } => header.trim().is_empty(),
            };
            if blank {
                return Err(CassetteError::ConfigError(format!(
                    "Sanitizer {i}: required field is empty"
                )));
            }
        }

        // Compiles every regex
        self.pipeline()
            .map_err(|e| CassetteError::ConfigError(format!("Invalid sanitizer: {e}")))?;

        Ok(())
    }

    /// Build the configured sanitizer pipeline
    ///
    /// # Errors
    ///
    /// Returns error if a sanitizer rule is invalid
    pub fn pipeline(&self) -> Result<SanitizerPipeline> {
        SanitizerPipeline::from_config(&self.sanitizers)
    }

    /// Build the configured matcher
    #[must_use]
    pub fn matcher(&self) -> DefaultMatcher {
        DefaultMatcher::new(self.matcher.clone())
    }
}
