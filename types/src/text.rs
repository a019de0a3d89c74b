//! Small pure text helpers: case folding, name normalization and
//! character-bounded truncation.

/// Unicode full case folding (`CaseFolding.txt` status C and F).
#[must_use]
pub fn fold_case(input: &str) -> String {
    caseless::default_case_fold_str(input)
}

/// Canonical lookup key for an element name: case-folded and trimmed.
///
/// Empty input yields empty output; callers reject empty names separately.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    fold_case(name).trim().to_string()
}

/// Keep at most `max` characters of `raw`. Never splits a scalar value.
#[must_use]
pub fn truncate_chars(raw: &str, max: usize) -> String {
    match raw.char_indices().nth(max) {
        Some((end, _)) => raw[..end].to_string(),
        None => raw.to_string(),
    }
}
