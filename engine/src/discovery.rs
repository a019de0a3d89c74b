//! Per-session unlock tracking.

use chrono::{DateTime, Utc};
use fusion_store::{StoreError, UnitOfWork};
use fusion_types::{ElementId, SessionId};

/// Unlock `element` for `session`. Returns `true` only the first time; an
/// existing unlock keeps its original timestamp and first-discovery flag.
pub fn record_discovery(
    uow: &UnitOfWork<'_>,
    session: &SessionId,
    element: ElementId,
    is_first_ever: bool,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    if uow.session_element(session, element)?.is_some() {
        return Ok(false);
    }
    uow.insert_session_element(session, element, is_first_ever, now)
}
