//! Core domain types for Fusion.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod candidate;
mod ids;
mod text;

pub use candidate::{Candidate, ParseError};
pub use ids::{CombinationId, ElementId, OrderKey, SessionId};
pub use text::{fold_case, normalize_name, truncate_chars};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// NonEmpty String Types
// ============================================================================

/// A string guaranteed to be non-empty (after trimming).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyString(String);

#[derive(Debug, Error)]
#[error("value must not be empty")]
pub struct EmptyStringError;

impl NonEmptyString {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyStringError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(EmptyStringError)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for NonEmptyString {
    type Error = EmptyStringError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for NonEmptyString {
    type Error = EmptyStringError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl std::ops::Deref for NonEmptyString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for NonEmptyString {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for NonEmptyString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A compile-time checked non-empty static string.
///
/// Must start with a visible ASCII character, which makes the conversion to
/// [`NonEmptyString`] infallible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NonEmptyStaticStr(&'static str);

impl NonEmptyStaticStr {
    #[must_use]
    pub const fn new(value: &'static str) -> Self {
        assert!(
            !value.is_empty() && value.as_bytes()[0].is_ascii_graphic(),
            "NonEmptyStaticStr must start with a visible ASCII character"
        );
        Self(value)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl From<NonEmptyStaticStr> for NonEmptyString {
    fn from(value: NonEmptyStaticStr) -> Self {
        Self(value.0.to_string())
    }
}

// ============================================================================
// Persistent Entities
// ============================================================================

/// A discovered concept a player can hold and combine.
///
/// `normalized_name` is unique across all elements and is the only
/// de-duplication key for generated output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub name: String,
    pub normalized_name: String,
    pub emoji: String,
    pub description: String,
    pub tags: Vec<String>,
    pub is_seed: bool,
    pub created_at: DateTime<Utc>,
}

/// The memoized resolution of one unordered pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combination {
    pub id: CombinationId,
    pub element_a: ElementId,
    pub element_b: ElementId,
    pub result: ElementId,
    pub order_key: OrderKey,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
}

/// One player's play-through, including its generation quota bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Calls made to the generation provider in the current window.
    pub generation_calls: u32,
    pub rate_limit_reset_at: DateTime<Utc>,
    /// Disables the safety filter for every request of this session.
    pub safety_override: bool,
}

/// A session's unlock record for one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionElement {
    pub session_id: SessionId,
    pub element_id: ElementId,
    pub discovered_at: DateTime<Utc>,
    /// This session was the first, globally, to produce the element.
    pub is_first_discovery: bool,
}

/// Outcome of the model-backed moderation stage for one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStage {
    /// Not run: cache hit, override active, moderation disabled, no
    /// credential configured, or the blocklist already rejected the output.
    Skipped,
    Passed,
    Rejected,
    /// The moderation call failed or answered ambiguously.
    Unavailable,
}

impl ModerationStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Passed => "passed",
            Self::Rejected => "rejected",
            Self::Unavailable => "unavailable",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "skipped" => Some(Self::Skipped),
            "passed" => Some(Self::Passed),
            "rejected" => Some(Self::Rejected),
            "unavailable" => Some(Self::Unavailable),
            _ => None,
        }
    }
}

/// Append-only audit record of one combine attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationLog {
    pub id: i64,
    pub session_id: SessionId,
    pub element_a: ElementId,
    pub element_b: ElementId,
    pub result: ElementId,
    pub was_safe: bool,
    pub moderation: ModerationStage,
    pub order_key: OrderKey,
    pub created_at: DateTime<Utc>,
}
