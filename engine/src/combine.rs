//! Pair resolution: cache first, then generation, safety, and persistence.
//!
//! A miss runs as two short transactions around the provider calls. The
//! first validates input, applies the quota and answers hits; the second
//! re-reads the pair before writing so a concurrent winner is replayed
//! instead of duplicated. No store lock is held while a provider call is
//! in flight.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fusion_store::{NewLogEntry, Store, StoreError, UnitOfWork};
use fusion_types::{
    Candidate, CombinationId, Element, ElementId, ModerationStage, OrderKey, Session, SessionId,
    normalize_name,
};
use serde::Serialize;

use crate::cache;
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineSettings, FailurePolicy};
use crate::discovery::record_discovery;
use crate::generation::{ElementGenerator, GenerationProvider};
use crate::rate_limit::RateLimiter;
use crate::registry;
use crate::safety::SafetyFilter;

#[derive(Debug, thiserror::Error)]
pub enum CombineError {
    #[error("element {0} does not exist")]
    ElementNotFound(ElementId),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Result of one `combine` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombineOutcome {
    pub element: Element,
    pub is_new_element_for_session: bool,
    pub is_first_ever_combination: bool,
    /// Absent when the session was out of quota.
    pub combination_id: Option<CombinationId>,
    pub rate_limit_reached: bool,
    pub was_safe: bool,
}

enum Prepared {
    Resolved(CombineOutcome),
    Generate {
        first: Element,
        second: Element,
        override_active: bool,
    },
}

struct Vetted {
    candidate: Candidate,
    was_safe: bool,
    moderation: ModerationStage,
}

pub struct CombinationEngine {
    store: Arc<Store>,
    settings: Arc<EngineSettings>,
    filter: Arc<SafetyFilter>,
    provider: GenerationProvider,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CombinationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinationEngine")
            .field("provider", &self.provider)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl CombinationEngine {
    /// `backend` is `None` when no credential is configured: every miss is
    /// then simulated and the model moderation stage is skipped.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        settings: EngineSettings,
        backend: Option<Arc<dyn ElementGenerator>>,
    ) -> Self {
        let settings = Arc::new(settings);
        let filter = Arc::new(SafetyFilter::new(&settings.moderation));
        let provider =
            GenerationProvider::new(backend, Arc::clone(&settings), Arc::clone(&filter));
        let limiter = RateLimiter::new(&settings.rate_limit);
        Self {
            store,
            settings,
            filter,
            provider,
            limiter,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// A session that starts its first quota window at `now`.
    pub(crate) fn fresh_session(
        &self,
        id: SessionId,
        safety_override: bool,
        now: DateTime<Utc>,
    ) -> Session {
        Session {
            id,
            created_at: now,
            last_active_at: now,
            generation_calls: 0,
            rate_limit_reset_at: self.limiter.next_reset(now),
            safety_override,
        }
    }

    /// Resolve the unordered pair `(first, second)` for `session_id`.
    ///
    /// Only an unknown element id is reported as an error. Provider
    /// failures, unsafe output and quota exhaustion all produce an outcome;
    /// `was_safe`, `rate_limit_reached` and the audit log tell them apart.
    pub async fn combine(
        &self,
        session_id: &SessionId,
        first: ElementId,
        second: ElementId,
        allow_unsafe: bool,
    ) -> Result<CombineOutcome, CombineError> {
        let key = OrderKey::new(first, second);

        let now = self.now();
        let prepared = self
            .store
            .transaction(|uow| self.prepare(uow, session_id, &key, first, second, allow_unsafe, now))
            .inspect_err(|err| log_storage_error(err, &key))?;

        let (first_element, second_element, override_active) = match prepared {
            Prepared::Resolved(outcome) => return Ok(outcome),
            Prepared::Generate {
                first,
                second,
                override_active,
            } => (first, second, override_active),
        };

        let generated = self
            .provider
            .generate(&first_element, &second_element)
            .await;
        let vetted = self.vet(generated.candidate, override_active).await;

        let now = self.now();
        let committed = self.store.transaction(|uow| {
            self.commit_generation(uow, session_id, &key, first, second, &vetted, now)
        });

        match committed {
            Err(CombineError::Storage(StoreError::Conflict { order_key })) => {
                tracing::info!(
                    %order_key,
                    session_id = %session_id,
                    "Pair resolved concurrently; replaying the stored result"
                );
                self.store
                    .transaction(|uow| {
                        let mut session = self.load_or_create_session(uow, session_id, now)?;
                        self.replay_hit(uow, &mut session, &key, first, second, now)?
                            .ok_or_else(|| {
                                CombineError::Storage(StoreError::Corrupt {
                                    what: "combination",
                                    detail: format!("{order_key} vanished after conflict"),
                                })
                            })
                    })
                    .inspect_err(|err| log_storage_error(err, &key))
            }
            other => other.inspect_err(|err| log_storage_error(err, &key)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn prepare(
        &self,
        uow: &UnitOfWork<'_>,
        session_id: &SessionId,
        key: &OrderKey,
        first: ElementId,
        second: ElementId,
        allow_unsafe: bool,
        now: DateTime<Utc>,
    ) -> Result<Prepared, CombineError> {
        let mut session = self.load_or_create_session(uow, session_id, now)?;
        let override_active = allow_unsafe || session.safety_override;
        if self.limiter.refresh(&mut session, now) {
            tracing::debug!(session_id = %session.id, "Generation quota window reset");
        }

        let first_element = uow
            .element(first)?
            .ok_or(CombineError::ElementNotFound(first))?;
        let second_element = uow
            .element(second)?
            .ok_or(CombineError::ElementNotFound(second))?;

        if let Some(outcome) = self.replay_hit(uow, &mut session, key, first, second, now)? {
            return Ok(Prepared::Resolved(outcome));
        }

        if self.limiter.is_exhausted(&session) {
            uow.save_session(&session)?;
            tracing::info!(
                session_id = %session.id,
                order_key = %key,
                quota = self.limiter.per_session(),
                "Generation quota exhausted"
            );
            return Ok(Prepared::Resolved(self.rate_limited(now)));
        }

        uow.save_session(&session)?;
        Ok(Prepared::Generate {
            first: first_element,
            second: second_element,
            override_active,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_generation(
        &self,
        uow: &UnitOfWork<'_>,
        session_id: &SessionId,
        key: &OrderKey,
        first: ElementId,
        second: ElementId,
        vetted: &Vetted,
        now: DateTime<Utc>,
    ) -> Result<CombineOutcome, CombineError> {
        let mut session = self.load_or_create_session(uow, session_id, now)?;

        if let Some(outcome) = self.replay_hit(uow, &mut session, key, first, second, now)? {
            tracing::info!(
                order_key = %key,
                session_id = %session_id,
                "Pair resolved concurrently; discarding our generation"
            );
            return Ok(outcome);
        }

        let element = registry::upsert(uow, &vetted.candidate, now)?;
        let combination = cache::record(uow, first, second, element.id, now)?;
        self.limiter.record_generation(&mut session);
        uow.append_log(
            &NewLogEntry {
                session_id: session.id.clone(),
                element_a: first,
                element_b: second,
                result: element.id,
                was_safe: vetted.was_safe,
                moderation: vetted.moderation,
                order_key: key.clone(),
            },
            now,
        )?;
        session.last_active_at = now;
        uow.save_session(&session)?;
        let is_new = record_discovery(uow, &session.id, element.id, true, now)?;

        tracing::info!(
            order_key = %key,
            session_id = %session.id,
            element = %element.id,
            name = %element.name,
            was_safe = vetted.was_safe,
            "New combination"
        );

        Ok(CombineOutcome {
            element,
            is_new_element_for_session: is_new,
            is_first_ever_combination: true,
            combination_id: Some(combination.id),
            rate_limit_reached: false,
            was_safe: vetted.was_safe,
        })
    }

    pub(crate) fn load_or_create_session(
        &self,
        uow: &UnitOfWork<'_>,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        if let Some(session) = uow.session(session_id)? {
            return Ok(session);
        }
        let session = self.fresh_session(session_id.clone(), false, now);
        uow.insert_session(&session)?;
        tracing::debug!(session_id = %session_id, "Created session on first combine");
        Ok(session)
    }

    /// Serve a cached pair. Hits never consume quota.
    fn replay_hit(
        &self,
        uow: &UnitOfWork<'_>,
        session: &mut Session,
        key: &OrderKey,
        first: ElementId,
        second: ElementId,
        now: DateTime<Utc>,
    ) -> Result<Option<CombineOutcome>, StoreError> {
        let Some(mut hit) = cache::lookup(uow, key)? else {
            return Ok(None);
        };
        cache::bump_usage(uow, &mut hit.combination)?;
        uow.append_log(
            &NewLogEntry {
                session_id: session.id.clone(),
                element_a: first,
                element_b: second,
                result: hit.element.id,
                was_safe: true,
                moderation: ModerationStage::Skipped,
                order_key: key.clone(),
            },
            now,
        )?;
        session.last_active_at = now;
        uow.save_session(session)?;
        let is_new = record_discovery(uow, &session.id, hit.element.id, false, now)?;

        tracing::debug!(
            order_key = %key,
            usage_count = hit.combination.usage_count,
            "Combination cache hit"
        );

        Ok(Some(CombineOutcome {
            element: hit.element,
            is_new_element_for_session: is_new,
            is_first_ever_combination: false,
            combination_id: Some(hit.combination.id),
            rate_limit_reached: false,
            was_safe: true,
        }))
    }

    /// Blocklist, then model moderation. Unsafe output is swapped for the
    /// configured fallback element.
    async fn vet(&self, candidate: Candidate, override_active: bool) -> Vetted {
        let blocked =
            !self
                .filter
                .is_safe_element(candidate.name.as_str(), &candidate.description, override_active);

        let moderation = if blocked || override_active || !self.settings.moderation.enabled {
            ModerationStage::Skipped
        } else {
            self.provider.moderate(&candidate).await
        };

        let was_safe = !blocked
            && match moderation {
                ModerationStage::Skipped | ModerationStage::Passed => true,
                ModerationStage::Rejected => false,
                ModerationStage::Unavailable => {
                    self.settings.moderation.on_failure == FailurePolicy::Open
                }
            };

        if was_safe {
            return Vetted {
                candidate,
                was_safe,
                moderation,
            };
        }

        tracing::warn!(
            name = %candidate.name,
            blocklisted = blocked,
            moderation = moderation.as_str(),
            "Unsafe generation replaced with fallback element"
        );
        let fallback = &self.settings.fallback;
        Vetted {
            candidate: Candidate::new(fallback.name.clone(), fallback.emoji.clone())
                .with_description(fallback.description.clone())
                .with_tags(fallback.tags.clone()),
            was_safe: false,
            moderation,
        }
    }

    fn rate_limited(&self, now: DateTime<Utc>) -> CombineOutcome {
        let fallback = &self.settings.fallback;
        CombineOutcome {
            element: Element {
                id: ElementId::UNSAVED,
                name: fallback.name.to_string(),
                normalized_name: normalize_name(fallback.name.as_str()),
                emoji: fallback.emoji.clone(),
                description: fallback.description.clone(),
                tags: fallback.limit_tags.clone(),
                is_seed: false,
                created_at: now,
            },
            is_new_element_for_session: false,
            is_first_ever_combination: false,
            combination_id: None,
            rate_limit_reached: true,
            was_safe: true,
        }
    }
}

fn log_storage_error(err: &CombineError, key: &OrderKey) {
    if let CombineError::Storage(source) = err {
        tracing::error!(order_key = %key, error = %source, "Combine failed in storage");
    }
}
