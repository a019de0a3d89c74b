//! Session bootstrap, override updates, and discovered-element listing.

use fusion_store::StoreError;
use fusion_types::{Element, ElementId, SessionId, fold_case};
use serde::Serialize;
use uuid::Uuid;

use crate::combine::CombinationEngine;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} does not exist")]
    NotFound(SessionId),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// A freshly created session and the starters it was granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewSession {
    pub id: SessionId,
    pub safety_override: bool,
    pub discovered_element_ids: Vec<ElementId>,
}

impl CombinationEngine {
    /// Start a session with a random id and unlock every starter element.
    pub fn create_session(&self, safety_override: bool) -> Result<NewSession, SessionError> {
        let now = self.now();
        let id = SessionId::new(Uuid::new_v4().to_string());
        let session = self.fresh_session(id.clone(), safety_override, now);

        let discovered_element_ids = self.store().transaction(|uow| {
            uow.insert_session(&session)?;
            let mut granted = Vec::new();
            for starter in uow.seed_elements()? {
                uow.insert_session_element(&id, starter.id, false, now)?;
                granted.push(starter.id);
            }
            Ok::<_, StoreError>(granted)
        })?;

        tracing::info!(
            session_id = %id,
            safety_override,
            starters = discovered_element_ids.len(),
            "Created session"
        );
        Ok(NewSession {
            id,
            safety_override,
            discovered_element_ids,
        })
    }

    pub fn set_safety_override(
        &self,
        session_id: &SessionId,
        safety_override: bool,
    ) -> Result<(), SessionError> {
        self.store().transaction(|uow| {
            let mut session = uow
                .session(session_id)?
                .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
            session.safety_override = safety_override;
            uow.save_session(&session)?;
            Ok::<_, SessionError>(())
        })?;
        tracing::info!(session_id = %session_id, safety_override, "Updated safety override");
        Ok(())
    }

    /// Elements the session has unlocked, starters first, then in discovery
    /// order. `query` keeps only names containing it, compared case-folded.
    pub fn discovered_elements(
        &self,
        session_id: &SessionId,
        query: Option<&str>,
    ) -> Result<Vec<Element>, SessionError> {
        let elements = self.store().transaction(|uow| {
            if uow.session(session_id)?.is_none() {
                return Err(SessionError::NotFound(session_id.clone()));
            }
            Ok(uow.discovered_elements(session_id)?)
        })?;

        let Some(needle) = query.map(fold_case).filter(|q| !q.is_empty()) else {
            return Ok(elements);
        };
        Ok(elements
            .into_iter()
            .filter(|element| fold_case(&element.name).contains(&needle))
            .collect())
    }
}
