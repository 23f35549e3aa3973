//! Cassette - deterministic record/replay store for HTTP test sessions
//!
//! Recorded interactions live in a [`Session`]. During recording each
//! sanitized interaction is [`Session::record`]ed; during replay each inbound
//! request is answered by [`Session::lookup`], which consumes the matched
//! entry so it is served exactly once. The [`codec`] module persists sessions
//! as JSON cassettes.

#![deny(unsafe_code)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::multiple_crate_versions
)]

pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod matcher;
pub mod sanitizer;
pub mod session;

pub use entry::{Entry, Headers, RecordedRequest, RecordedResponse};
pub use error::{CassetteError, Result};
pub use matcher::{DefaultMatcher, MatchOptions, Matcher, TiePolicy};
pub use sanitizer::{Sanitizer, SanitizerPipeline};
pub use session::{Session, Variables};
