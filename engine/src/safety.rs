//! Blocklist-based content filter.
//!
//! Terms match case-insensitively as plain substrings: a blocked term inside
//! a longer word still matches. Both the terms and the scanned text are
//! case-folded first, so `STRASSE` matches a `straße` entry.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use fusion_types::{fold_case, truncate_chars};

use crate::config::ModerationSettings;

/// Longest tag kept, in characters.
pub const MAX_TAG_CHARS: usize = 30;

pub struct SafetyFilter {
    enabled: bool,
    terms: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl std::fmt::Debug for SafetyFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyFilter")
            .field("enabled", &self.enabled)
            .field("term_count", &self.terms.len())
            .finish_non_exhaustive()
    }
}

impl SafetyFilter {
    #[must_use]
    pub fn new(settings: &ModerationSettings) -> Self {
        let terms: Vec<String> = settings
            .blocklist
            .iter()
            .map(|term| fold_case(term.trim()))
            .filter(|term| !term.is_empty())
            .collect();

        let automaton = if terms.is_empty() {
            None
        } else {
            match AhoCorasickBuilder::new()
                .match_kind(MatchKind::LeftmostFirst)
                .build(&terms)
            {
                Ok(ac) => Some(ac),
                Err(e) => {
                    tracing::warn!(
                        term_count = terms.len(),
                        "Blocklist automaton build failed; using linear scan ({e})"
                    );
                    None
                }
            }
        };

        Self {
            enabled: settings.enabled,
            terms,
            automaton,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `true` unless moderation is on, no override is active, and the text
    /// contains a blocked term.
    #[must_use]
    pub fn is_safe(&self, text: &str, override_active: bool) -> bool {
        if !self.enabled || override_active || text.is_empty() || self.terms.is_empty() {
            return true;
        }
        let folded = fold_case(text);
        match &self.automaton {
            Some(ac) => !ac.is_match(&folded),
            None => !self.terms.iter().any(|term| folded.contains(term.as_str())),
        }
    }

    #[must_use]
    pub fn is_safe_element(&self, name: &str, description: &str, override_active: bool) -> bool {
        self.is_safe(name, override_active) && self.is_safe(description, override_active)
    }

    /// Trim, drop empties, (with moderation on) drop tags that fail the
    /// blocklist on their own, then cap length. The blocklist sees the whole
    /// tag, so a term cut by the cap still drops it.
    #[must_use]
    pub fn sanitize_tags(&self, tags: &[String], moderation_enabled: bool) -> Vec<String> {
        tags.iter()
            .map(|tag| tag.trim())
            .filter(|tag| !tag.is_empty())
            .filter(|tag| !moderation_enabled || self.is_safe(tag, false))
            .map(|tag| truncate_chars(tag, MAX_TAG_CHARS))
            .collect()
    }
}
