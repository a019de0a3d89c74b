//! Session bootstrap, listings, stats, and file-backed persistence

use std::sync::Arc;

use fusion_engine::{
    CombinationEngine, EngineSettings, SessionError, SessionId, StarterElement, Store,
};

use crate::common::Harness;

#[tokio::test]
async fn created_session_lists_starters_then_discoveries() {
    let h = Harness::offline();
    let session = h.engine.create_session(false).unwrap();
    assert_eq!(
        session.discovered_element_ids,
        vec![h.water.id, h.fire.id, h.earth.id, h.air.id]
    );

    h.clock.advance(chrono::Duration::seconds(1));
    h.engine
        .combine(&session.id, h.water.id, h.fire.id, false)
        .await
        .unwrap();
    h.clock.advance(chrono::Duration::seconds(1));
    h.engine
        .combine(&session.id, h.earth.id, h.air.id, false)
        .await
        .unwrap();

    let names: Vec<String> = h
        .engine
        .discovered_elements(&session.id, None)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(
        names,
        [
            "Water",
            "Fire",
            "Earth",
            "Air",
            "Water Fire Blend",
            "Earth Air Blend"
        ]
    );

    let blends = h.engine.discovered_elements(&session.id, Some("BLEND")).unwrap();
    assert_eq!(blends.len(), 2);
}

#[tokio::test]
async fn starters_are_not_first_discoveries() {
    let h = Harness::offline();
    let session = h.engine.create_session(true).unwrap();
    assert!(session.safety_override);

    let row = h
        .store()
        .transaction(|uow| uow.session_element(&session.id, h.fire.id))
        .unwrap()
        .unwrap();
    assert!(!row.is_first_discovery);

    let again = h
        .engine
        .combine(&session.id, h.water.id, h.water.id, false)
        .await
        .unwrap();
    assert!(again.is_first_ever_combination);
    assert_eq!(again.element.name, "Water Water Blend");
}

#[test]
fn unknown_sessions_are_reported() {
    let h = Harness::offline();
    let missing = SessionId::new("missing");
    assert!(matches!(
        h.engine.discovered_elements(&missing, None),
        Err(SessionError::NotFound(id)) if id == missing
    ));
    assert!(matches!(
        h.engine.set_safety_override(&missing, false),
        Err(SessionError::NotFound(_))
    ));
}

#[tokio::test]
async fn stats_reflect_usage() {
    let h = Harness::offline();
    let s = SessionId::new("x");
    for _ in 0..3 {
        h.engine.combine(&s, h.fire.id, h.air.id, false).await.unwrap();
    }
    h.engine.combine(&s, h.water.id, h.earth.id, false).await.unwrap();

    let stats = h.engine.usage_stats(5).unwrap();
    assert_eq!(stats.total_combinations, 2);
    assert_eq!(stats.popular_elements.len(), 2);
    assert_eq!(stats.popular_elements[0].name, "Fire Air Blend");
    assert_eq!(stats.popular_elements[0].usage_count, 3);
    assert_eq!(stats.popular_pairs[1].usage_count, 1);
    assert_eq!(stats.generated_at, crate::common::t0());

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["popular_pairs"][0]["usage_count"], 3);
}

#[tokio::test]
async fn combinations_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fusion.db");

    let first_id = {
        let store = Arc::new(Store::open(&path).unwrap());
        let engine = CombinationEngine::new(store, EngineSettings::default(), None);
        let seeded = engine.seed_starters(StarterElement::defaults()).unwrap();
        let outcome = engine
            .combine(&SessionId::new("x"), seeded[0].id, seeded[1].id, false)
            .await
            .unwrap();
        outcome.element.id
    };

    let store = Arc::new(Store::open(&path).unwrap());
    let engine = CombinationEngine::new(store, EngineSettings::default(), None);
    let seeded = engine.seed_starters(StarterElement::defaults()).unwrap();
    let replay = engine
        .combine(&SessionId::new("y"), seeded[1].id, seeded[0].id, false)
        .await
        .unwrap();
    assert_eq!(replay.element.id, first_id);
    assert!(!replay.is_first_ever_combination);
    assert!(replay.is_new_element_for_session);
}
