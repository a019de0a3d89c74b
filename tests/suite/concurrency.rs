//! Concurrent resolution of the same new pair

use std::sync::Arc;
use std::time::Duration;

use fusion_engine::{EngineSettings, OrderKey, SessionId};

use crate::common::{Harness, Reply, ScriptedGenerator};

#[tokio::test]
async fn racing_sessions_share_one_combination() {
    let generator = Arc::new(
        ScriptedGenerator::new([Reply::Text("🌫️ Steam"), Reply::Text("☁️ Cloud")])
            .with_delay(Duration::from_millis(20)),
    );
    let h = Harness::with_generator(EngineSettings::default(), generator.clone());
    let a = SessionId::new("a");
    let b = SessionId::new("b");

    let (left, right) = tokio::join!(
        h.engine.combine(&a, h.water.id, h.fire.id, false),
        h.engine.combine(&b, h.fire.id, h.water.id, false),
    );
    let (left, right) = (left.unwrap(), right.unwrap());

    // Both missed, so both reached the provider.
    assert_eq!(generator.generations(), 2);
    assert_eq!(left.element, right.element);
    assert_eq!(left.combination_id, right.combination_id);
    assert!(left.is_first_ever_combination ^ right.is_first_ever_combination);
    assert!(left.is_new_element_for_session && right.is_new_element_for_session);

    let key = OrderKey::new(h.water.id, h.fire.id);
    let combination = h
        .store()
        .transaction(|uow| uow.combination(&key))
        .unwrap()
        .unwrap();
    assert_eq!(combination.usage_count, 2);
    assert_eq!(h.store().transaction(|uow| uow.combination_count()).unwrap(), 1);

    // The loser's candidate never became an element.
    let loser_name = if left.element.name == "Steam" { "cloud" } else { "steam" };
    let orphan = h
        .store()
        .transaction(|uow| uow.element_by_normalized_name(loser_name))
        .unwrap();
    assert!(orphan.is_none());

    // Only the winner was charged.
    let calls: u32 = [&a, &b]
        .into_iter()
        .map(|id| {
            h.store()
                .transaction(|uow| uow.session(id))
                .unwrap()
                .unwrap()
                .generation_calls
        })
        .sum();
    assert_eq!(calls, 1);

    let logs = h.store().transaction(|uow| uow.logs_for_order_key(&key)).unwrap();
    assert_eq!(logs.len(), 2);
}

#[tokio::test]
async fn different_pairs_proceed_independently() {
    let generator = Arc::new(
        ScriptedGenerator::new([Reply::Text("🌫️ Steam"), Reply::Text("🟫 Mud")])
            .with_delay(Duration::from_millis(10)),
    );
    let h = Harness::with_generator(EngineSettings::default(), generator);
    let session = SessionId::new("x");

    let (left, right) = tokio::join!(
        h.engine.combine(&session, h.water.id, h.fire.id, false),
        h.engine.combine(&session, h.water.id, h.earth.id, false),
    );
    let (left, right) = (left.unwrap(), right.unwrap());

    assert_ne!(left.combination_id, right.combination_id);
    assert!(left.is_first_ever_combination && right.is_first_ever_combination);
    assert_eq!(h.store().transaction(|uow| uow.combination_count()).unwrap(), 2);
    let stored = h.store().transaction(|uow| uow.session(&session)).unwrap().unwrap();
    assert_eq!(stored.generation_calls, 2);
}
