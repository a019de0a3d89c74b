//! Generation candidates and the strict parser for raw model output.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

use crate::NonEmptyString;

/// A proposed element produced by a generator, before safety checks and
/// before it is reconciled with the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: NonEmptyString,
    pub emoji: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl Candidate {
    #[must_use]
    pub fn new(name: NonEmptyString, emoji: impl Into<String>) -> Self {
        Self {
            name,
            emoji: emoji.into(),
            description: String::new(),
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Parse raw model text of the form `"<glyph><name>"`.
    ///
    /// Only the first non-empty line is read. Its first grapheme cluster is
    /// the emoji (so ZWJ sequences and flags stay whole) and the trimmed
    /// remainder is the name. Extra lines are ignored.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        let line = raw
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or(ParseError::Empty)?;

        if line.chars().count() < 2 {
            return Err(ParseError::TooShort);
        }

        let mut graphemes = line.graphemes(true);
        let emoji = graphemes.next().ok_or(ParseError::TooShort)?;
        let name = graphemes.as_str().trim();
        let name = NonEmptyString::new(name).map_err(|_| ParseError::MissingName)?;

        Ok(Self::new(name, emoji))
    }
}

/// Why raw generator output could not be read as a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("response was empty")]
    Empty,
    #[error("response too short for emoji and name")]
    TooShort,
    #[error("missing name after emoji")]
    MissingName,
}
