//! Starter elements every new session receives.

use fusion_store::{NewElement, Store, StoreError};
use fusion_types::{Element, normalize_name};

use crate::clock::Clock;
use crate::combine::CombinationEngine;

pub const STARTER_TAG: &str = "starter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarterElement {
    pub name: &'static str,
    pub emoji: &'static str,
    pub description: &'static str,
}

const DEFAULT_STARTERS: [StarterElement; 4] = [
    StarterElement {
        name: "Water",
        emoji: "💧",
        description: "Clear, flowing, and the source of all life.",
    },
    StarterElement {
        name: "Fire",
        emoji: "🔥",
        description: "Heat that stretches from the hearth to the kiln.",
    },
    StarterElement {
        name: "Earth",
        emoji: "🌱",
        description: "Fertile soil waiting for something to grow.",
    },
    StarterElement {
        name: "Air",
        emoji: "💨",
        description: "A cool wind blowing in from the sea.",
    },
];

impl StarterElement {
    #[must_use]
    pub fn defaults() -> &'static [StarterElement] {
        &DEFAULT_STARTERS
    }
}

/// Insert missing starters and promote existing elements with a starter name.
///
/// Idempotent. Returns the starter elements in the order given.
pub fn seed_starter_elements(
    store: &Store,
    starters: &[StarterElement],
    clock: &dyn Clock,
) -> Result<Vec<Element>, StoreError> {
    let now = clock.now();
    store.transaction(|uow| {
        let mut seeded = Vec::with_capacity(starters.len());
        for starter in starters {
            let normalized_name = normalize_name(starter.name);
            if let Some(mut existing) = uow.element_by_normalized_name(&normalized_name)? {
                if !existing.is_seed {
                    uow.mark_seed(existing.id)?;
                    existing.is_seed = true;
                    tracing::info!(name = starter.name, "Promoted existing element to starter");
                }
                seeded.push(existing);
                continue;
            }

            let element = uow.insert_element(
                &NewElement {
                    name: starter.name.to_string(),
                    normalized_name,
                    emoji: starter.emoji.to_string(),
                    description: starter.description.to_string(),
                    tags: vec![STARTER_TAG.to_string()],
                    is_seed: true,
                },
                now,
            )?;
            tracing::info!(name = starter.name, element = %element.id, "Seeded starter element");
            seeded.push(element);
        }
        Ok(seeded)
    })
}

impl CombinationEngine {
    /// [`seed_starter_elements`] against this engine's store and clock.
    pub fn seed_starters(&self, starters: &[StarterElement]) -> Result<Vec<Element>, StoreError> {
        seed_starter_elements(self.store(), starters, self.clock())
    }
}
