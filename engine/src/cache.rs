//! Memoized pair resolutions.

use chrono::{DateTime, Utc};
use fusion_store::{StoreError, UnitOfWork};
use fusion_types::{Combination, Element, ElementId, OrderKey};

/// A cached combination together with its resolved result element.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub combination: Combination,
    pub element: Element,
}

/// Look up a pair by its order key.
///
/// A row whose result element no longer exists is deleted and reported as a
/// miss, so the pair regenerates instead of failing forever.
pub fn lookup(uow: &UnitOfWork<'_>, key: &OrderKey) -> Result<Option<CachedResult>, StoreError> {
    let Some(combination) = uow.combination(key)? else {
        return Ok(None);
    };
    match uow.element(combination.result)? {
        Some(element) => Ok(Some(CachedResult {
            combination,
            element,
        })),
        None => {
            tracing::warn!(
                order_key = %key,
                result = %combination.result,
                "Cached combination points at a missing element; discarding"
            );
            uow.delete_combination(combination.id)?;
            Ok(None)
        }
    }
}

pub fn record(
    uow: &UnitOfWork<'_>,
    first: ElementId,
    second: ElementId,
    result: ElementId,
    now: DateTime<Utc>,
) -> Result<Combination, StoreError> {
    uow.insert_combination(first, second, result, now)
}

pub fn bump_usage(uow: &UnitOfWork<'_>, combination: &mut Combination) -> Result<(), StoreError> {
    combination.usage_count = uow.bump_usage(combination.id)?;
    Ok(())
}
