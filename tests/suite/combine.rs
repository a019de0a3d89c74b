//! End-to-end combine behavior: canonical pairs, memoization, discovery flags

use std::sync::Arc;

use fusion_engine::{ElementId, EngineSettings, ModerationStage, OrderKey, SessionId};

use crate::common::{Harness, Reply, ScriptedGenerator, t0};

#[tokio::test]
async fn either_order_resolves_to_the_same_row() {
    let h = Harness::offline();
    let session = SessionId::new("x");

    let forward = h
        .engine
        .combine(&session, h.water.id, h.fire.id, false)
        .await
        .unwrap();
    let reverse = h
        .engine
        .combine(&session, h.fire.id, h.water.id, false)
        .await
        .unwrap();

    assert_eq!(forward.combination_id, reverse.combination_id);
    assert_eq!(forward.element, reverse.element);
    assert_eq!(
        OrderKey::new(h.water.id, h.fire.id),
        OrderKey::new(h.fire.id, h.water.id)
    );
}

#[tokio::test]
async fn repeat_calls_never_duplicate_and_count_usage() {
    let h = Harness::offline();
    let key = OrderKey::new(h.water.id, h.fire.id);

    h.engine
        .combine(&SessionId::new("a"), h.water.id, h.fire.id, false)
        .await
        .unwrap();
    let first = h
        .store()
        .transaction(|uow| uow.combination(&key))
        .unwrap()
        .unwrap();

    h.engine
        .combine(&SessionId::new("b"), h.fire.id, h.water.id, false)
        .await
        .unwrap();
    let second = h
        .store()
        .transaction(|uow| uow.combination(&key))
        .unwrap()
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.usage_count, first.usage_count + 1);
    let total = h.store().transaction(|uow| uow.combination_count()).unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn failing_provider_falls_back_to_input_derived_names() {
    let generator = Arc::new(ScriptedGenerator::always_failing());
    let h = Harness::with_generator(EngineSettings::default(), generator.clone());

    let outcome = h
        .engine
        .combine(&SessionId::new("x"), h.earth.id, h.air.id, false)
        .await
        .unwrap();

    assert_eq!(generator.generations(), 1);
    assert_eq!(outcome.element.name, "Earth Air Blend");
    assert_eq!(outcome.element.emoji, "🌱");
    assert!(outcome.was_safe);
}

#[tokio::test]
async fn starter_example_across_two_sessions() {
    let h = Harness::offline();
    let x = SessionId::new("session-x");
    let y = SessionId::new("session-y");

    let first = h.engine.combine(&x, h.water.id, h.fire.id, false).await.unwrap();
    assert_eq!(first.element.name, "Water Fire Blend");
    assert_eq!(first.element.emoji, "💧");
    assert!(first.is_first_ever_combination);
    assert!(first.is_new_element_for_session);
    assert!(!first.rate_limit_reached);

    let second = h.engine.combine(&y, h.water.id, h.fire.id, false).await.unwrap();
    assert_eq!(second.element, first.element);
    assert!(!second.is_first_ever_combination);
    assert!(second.is_new_element_for_session);

    let repeat = h.engine.combine(&y, h.fire.id, h.water.id, false).await.unwrap();
    assert!(!repeat.is_first_ever_combination);
    assert!(!repeat.is_new_element_for_session);

    let x_row = h
        .store()
        .transaction(|uow| uow.session_element(&x, first.element.id))
        .unwrap()
        .unwrap();
    let y_row = h
        .store()
        .transaction(|uow| uow.session_element(&y, first.element.id))
        .unwrap()
        .unwrap();
    assert!(x_row.is_first_discovery);
    assert!(!y_row.is_first_discovery);
}

#[tokio::test]
async fn every_attempt_is_logged() {
    let h = Harness::offline();
    let session = SessionId::new("x");
    let key = OrderKey::new(h.water.id, h.earth.id);

    h.engine.combine(&session, h.water.id, h.earth.id, false).await.unwrap();
    h.engine.combine(&session, h.earth.id, h.water.id, false).await.unwrap();

    let logs = h.store().transaction(|uow| uow.logs_for_order_key(&key)).unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|log| log.was_safe));
    assert!(logs.iter().all(|log| log.moderation == ModerationStage::Skipped));
    assert_eq!(logs[1].element_a, h.earth.id);
    assert_eq!(logs[1].element_b, h.water.id);
}

#[tokio::test]
async fn session_is_created_lazily_and_touched() {
    let h = Harness::offline();
    let session = SessionId::new("lazy");

    h.engine.combine(&session, h.water.id, h.air.id, false).await.unwrap();
    let stored = h
        .store()
        .transaction(|uow| uow.session(&session))
        .unwrap()
        .unwrap();
    assert_eq!(stored.generation_calls, 1);
    assert_eq!(stored.created_at, crate::common::t0());

    h.clock.advance(chrono::Duration::minutes(3));
    h.engine.combine(&session, h.water.id, h.air.id, false).await.unwrap();
    let touched = h
        .store()
        .transaction(|uow| uow.session(&session))
        .unwrap()
        .unwrap();
    assert_eq!(touched.last_active_at, crate::common::t0() + chrono::Duration::minutes(3));
    assert_eq!(touched.generation_calls, 1);
}

#[tokio::test]
async fn unknown_element_leaves_no_trace() {
    let h = Harness::offline();
    let session = SessionId::new("ghost");

    let err = h
        .engine
        .combine(&session, ElementId::new(9_999), h.fire.id, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        fusion_engine::CombineError::ElementNotFound(id) if id == ElementId::new(9_999)
    ));

    let stored = h.store().transaction(|uow| uow.session(&session)).unwrap();
    assert!(stored.is_none());
}

#[tokio::test]
async fn remote_candidate_is_stored_and_merges_on_name_collision() {
    let generator = Arc::new(ScriptedGenerator::new([
        Reply::Text("🌫️ Steam"),
        Reply::Text("♨️ STEAM"),
    ]));
    let h = Harness::with_generator(EngineSettings::default(), generator.clone());
    let session = SessionId::new("x");

    let first = h.engine.combine(&session, h.water.id, h.fire.id, false).await.unwrap();
    let second = h.engine.combine(&session, h.water.id, h.air.id, false).await.unwrap();

    assert_eq!(first.element.name, "Steam");
    assert_eq!(second.element.id, first.element.id);
    assert_eq!(second.element.name, "Steam");
    assert_eq!(second.element.emoji, "♨️");
    assert!(second.is_first_ever_combination);
    assert!(!second.is_new_element_for_session);
    assert_eq!(generator.moderations(), 2);
}

#[tokio::test]
async fn stale_cached_pair_is_discarded_and_regenerated() {
    let h = Harness::offline();
    let key = OrderKey::new(h.water.id, h.fire.id);
    h.store()
        .transaction(|uow| uow.insert_combination(h.water.id, h.fire.id, ElementId::new(9_999), t0()))
        .unwrap();

    let outcome = h
        .engine
        .combine(&SessionId::new("x"), h.fire.id, h.water.id, false)
        .await
        .unwrap();

    assert!(outcome.is_first_ever_combination);
    assert!(outcome.is_new_element_for_session);
    assert_eq!(outcome.element.name, "Water Fire Blend");

    let stored = h
        .store()
        .transaction(|uow| uow.combination(&key))
        .unwrap()
        .unwrap();
    assert_eq!(Some(stored.id), outcome.combination_id);
    assert_eq!(stored.result, outcome.element.id);
    assert_eq!(stored.usage_count, 1);
}
