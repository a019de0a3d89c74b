//! Candidate generation: remote backend first, local simulation on any failure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use fusion_providers::GenerationError;
use fusion_providers::gemini::{GeminiClient, ModerationVerdict};
use fusion_types::{Candidate, Element, ModerationStage, NonEmptyString, truncate_chars};

use crate::config::{EngineSettings, FallbackElement};
use crate::registry::MAX_NAME_CHARS;
use crate::safety::SafetyFilter;

pub type GenerateFut<'a> =
    Pin<Box<dyn Future<Output = Result<Candidate, GenerationError>> + Send + 'a>>;
pub type ModerateFut<'a> =
    Pin<Box<dyn Future<Output = Result<ModerationVerdict, GenerationError>> + Send + 'a>>;

/// A remote source of new elements.
pub trait ElementGenerator: Send + Sync {
    fn generate<'a>(&'a self, first: &'a Element, second: &'a Element) -> GenerateFut<'a>;
    fn moderate<'a>(&'a self, candidate: &'a Candidate) -> ModerateFut<'a>;
}

impl ElementGenerator for GeminiClient {
    fn generate<'a>(&'a self, first: &'a Element, second: &'a Element) -> GenerateFut<'a> {
        Box::pin(GeminiClient::generate(self, first, second))
    }

    fn moderate<'a>(&'a self, candidate: &'a Candidate) -> ModerateFut<'a> {
        Box::pin(GeminiClient::moderate(self, candidate))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Remote,
    Simulated,
}

#[derive(Debug, Clone)]
pub struct Generated {
    pub candidate: Candidate,
    pub source: CandidateSource,
}

/// Wraps an optional backend with the timeout and fallback policy.
///
/// Without a backend (no credential configured) every generation is
/// simulated and the moderation stage is skipped.
#[derive(Clone)]
pub struct GenerationProvider {
    backend: Option<Arc<dyn ElementGenerator>>,
    settings: Arc<EngineSettings>,
    filter: Arc<SafetyFilter>,
}

impl std::fmt::Debug for GenerationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationProvider")
            .field("has_backend", &self.backend.is_some())
            .finish_non_exhaustive()
    }
}

impl GenerationProvider {
    #[must_use]
    pub fn new(
        backend: Option<Arc<dyn ElementGenerator>>,
        settings: Arc<EngineSettings>,
        filter: Arc<SafetyFilter>,
    ) -> Self {
        Self {
            backend,
            settings,
            filter,
        }
    }

    #[must_use]
    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Never fails: every backend error, timeout included, falls back to
    /// [`simulate`].
    pub async fn generate(
        &self,
        first: &Element,
        second: &Element,
    ) -> Generated {
        let simulated = || Generated {
            candidate: simulate(first, second, &self.settings.fallback),
            source: CandidateSource::Simulated,
        };

        let Some(backend) = &self.backend else {
            tracing::debug!("No generation backend configured; simulating");
            return simulated();
        };

        let result = tokio::time::timeout(
            self.settings.provider_timeout,
            backend.generate(first, second),
        )
        .await
        .unwrap_or(Err(GenerationError::Timeout));

        match result {
            Ok(mut candidate) => {
                // Tag filtering follows the global switch only; overrides
                // apply to the name and description checks.
                candidate.tags = self
                    .filter
                    .sanitize_tags(&candidate.tags, self.settings.moderation.enabled);
                Generated {
                    candidate,
                    source: CandidateSource::Remote,
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    element_a = %first.id,
                    element_b = %second.id,
                    "Generation failed; using local simulation"
                );
                simulated()
            }
        }
    }

    /// Run the model moderation check. `Skipped` without a backend.
    pub async fn moderate(&self, candidate: &Candidate) -> ModerationStage {
        let Some(backend) = &self.backend else {
            return ModerationStage::Skipped;
        };

        let verdict = tokio::time::timeout(self.settings.provider_timeout, backend.moderate(candidate))
            .await
            .unwrap_or(Err(GenerationError::Timeout));

        match verdict {
            Ok(ModerationVerdict::Safe) => ModerationStage::Passed,
            Ok(ModerationVerdict::Unsafe) => ModerationStage::Rejected,
            Ok(ModerationVerdict::Inconclusive(answer)) => {
                tracing::warn!(%answer, "Moderation answer inconclusive");
                ModerationStage::Unavailable
            }
            Err(err) => {
                tracing::warn!(error = %err, "Moderation check failed");
                ModerationStage::Unavailable
            }
        }
    }
}

fn first_word(name: &str) -> Option<&str> {
    name.split_whitespace().next()
}

/// Deterministic offline generation: `"{A} {B} {suffix}"` from the first word
/// of each input name, with A's emoji, else B's, else the default.
#[must_use]
pub fn simulate(first: &Element, second: &Element, fallback: &FallbackElement) -> Candidate {
    let words: Vec<&str> = [
        first_word(&first.name),
        first_word(&second.name),
        Some(fallback.fusion_suffix.as_str()),
    ]
    .into_iter()
    .flatten()
    .collect();
    let name = NonEmptyString::new(truncate_chars(&words.join(" "), MAX_NAME_CHARS))
        .unwrap_or_else(|_| fallback.fusion_suffix.clone());

    let emoji = [&first.emoji, &second.emoji]
        .into_iter()
        .map(|emoji| emoji.trim())
        .find(|emoji| !emoji.is_empty())
        .unwrap_or(fallback.default_emoji.as_str());

    Candidate::new(name, emoji)
}
