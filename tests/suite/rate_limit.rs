//! Per-session generation quota

use chrono::Duration;
use fusion_engine::{ElementId, EngineSettings, OrderKey, SessionId};

use crate::common::Harness;

fn quota(per_session: u32) -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.rate_limit.per_session = per_session;
    settings
}

#[tokio::test]
async fn exhausted_session_gets_placeholder_without_writes() {
    let h = Harness::new(quota(2), None);
    let session = SessionId::new("x");

    h.engine.combine(&session, h.water.id, h.fire.id, false).await.unwrap();
    h.engine.combine(&session, h.water.id, h.earth.id, false).await.unwrap();

    let limited = h
        .engine
        .combine(&session, h.water.id, h.air.id, false)
        .await
        .unwrap();
    assert!(limited.rate_limit_reached);
    assert!(limited.combination_id.is_none());
    assert_eq!(limited.element.id, ElementId::UNSAVED);
    assert_eq!(limited.element.name, "Mystery Fog");
    assert_eq!(limited.element.tags, vec!["limit".to_string()]);
    assert!(!limited.is_first_ever_combination);
    assert!(!limited.is_new_element_for_session);

    let key = OrderKey::new(h.water.id, h.air.id);
    assert!(h.store().transaction(|uow| uow.combination(&key)).unwrap().is_none());
    assert!(
        h.store()
            .transaction(|uow| uow.logs_for_order_key(&key))
            .unwrap()
            .is_empty()
    );
    let stored = h.store().transaction(|uow| uow.session(&session)).unwrap().unwrap();
    assert_eq!(stored.generation_calls, 2);
}

#[tokio::test]
async fn cache_hits_stay_free_when_exhausted() {
    let h = Harness::new(quota(1), None);
    let session = SessionId::new("x");
    let other = SessionId::new("y");

    h.engine.combine(&other, h.earth.id, h.air.id, false).await.unwrap();
    h.engine.combine(&session, h.water.id, h.fire.id, false).await.unwrap();

    let hit = h
        .engine
        .combine(&session, h.air.id, h.earth.id, false)
        .await
        .unwrap();
    assert!(!hit.rate_limit_reached);
    assert_eq!(hit.element.name, "Earth Air Blend");
    assert!(hit.is_new_element_for_session);
}

#[tokio::test]
async fn quota_returns_after_window() {
    let h = Harness::new(quota(1), None);
    let session = SessionId::new("x");

    h.engine.combine(&session, h.water.id, h.fire.id, false).await.unwrap();
    let limited = h
        .engine
        .combine(&session, h.water.id, h.earth.id, false)
        .await
        .unwrap();
    assert!(limited.rate_limit_reached);

    h.clock.advance(Duration::hours(23));
    let still = h
        .engine
        .combine(&session, h.water.id, h.earth.id, false)
        .await
        .unwrap();
    assert!(still.rate_limit_reached);

    h.clock.advance(Duration::hours(1));
    let fresh = h
        .engine
        .combine(&session, h.water.id, h.earth.id, false)
        .await
        .unwrap();
    assert!(!fresh.rate_limit_reached);
    assert!(fresh.is_first_ever_combination);

    let stored = h.store().transaction(|uow| uow.session(&session)).unwrap().unwrap();
    assert_eq!(stored.generation_calls, 1);
    assert_eq!(
        stored.rate_limit_reset_at,
        crate::common::t0() + Duration::hours(48)
    );
}
