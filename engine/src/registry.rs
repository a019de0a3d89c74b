//! Element de-duplication by normalized name.

use chrono::{DateTime, Utc};
use fusion_store::{NewElement, StoreError, UnitOfWork};
use fusion_types::{Candidate, Element, normalize_name, truncate_chars};

use crate::safety::MAX_TAG_CHARS;

pub const MAX_NAME_CHARS: usize = 40;
pub const MAX_NORMALIZED_CHARS: usize = 80;
pub const MAX_EMOJI_CHARS: usize = 8;
pub const MAX_DESCRIPTION_CHARS: usize = 180;

/// Store `candidate`, or fold it into the element that already owns its
/// normalized name.
///
/// On collision the existing element keeps its id, display name and seed
/// flag, but its emoji, description and tags are overwritten with the
/// candidate's. Generating an existing name therefore rewrites that
/// element's flavor for every session that already holds it, seeds included.
pub fn upsert(
    uow: &UnitOfWork<'_>,
    candidate: &Candidate,
    now: DateTime<Utc>,
) -> Result<Element, StoreError> {
    let normalized_name = truncate_chars(
        &normalize_name(candidate.name.as_str()),
        MAX_NORMALIZED_CHARS,
    );
    let emoji = truncate_chars(candidate.emoji.trim(), MAX_EMOJI_CHARS);
    let description = truncate_chars(candidate.description.trim(), MAX_DESCRIPTION_CHARS);
    let tags: Vec<String> = candidate
        .tags
        .iter()
        .map(|tag| truncate_chars(tag, MAX_TAG_CHARS))
        .collect();

    if let Some(mut existing) = uow.element_by_normalized_name(&normalized_name)? {
        tracing::debug!(
            element = %existing.id,
            name = %existing.name,
            "Generated name collides with existing element; refreshing content"
        );
        uow.update_element_content(existing.id, &emoji, &description, &tags)?;
        existing.emoji = emoji;
        existing.description = description;
        existing.tags = tags;
        return Ok(existing);
    }

    uow.insert_element(
        &NewElement {
            name: truncate_chars(candidate.name.trim(), MAX_NAME_CHARS),
            normalized_name,
            emoji,
            description,
            tags,
            is_seed: false,
        },
        now,
    )
}
