//! Engine over the real Gemini client against a mock server

use std::sync::Arc;
use std::time::Duration;

use fusion_engine::{ElementGenerator, EngineSettings, ModerationStage, OrderKey, SessionId};
use wiremock::MockServer;

use crate::common::{Harness, gemini_client, mount_gemini_status, mount_gemini_text};

fn harness(server: &MockServer, settings: EngineSettings) -> Harness {
    let client: Arc<dyn ElementGenerator> = Arc::new(gemini_client(server));
    Harness::new(settings, Some(client))
}

#[tokio::test]
async fn remote_generation_and_moderation_pass() {
    let server = MockServer::start().await;
    mount_gemini_text(&server, "gen-model", "🌫️ Steam\nwater meets fire").await;
    mount_gemini_text(&server, "mod-model", "\"Safe.\"").await;
    let h = harness(&server, EngineSettings::default());

    let outcome = h
        .engine
        .combine(&SessionId::new("x"), h.water.id, h.fire.id, false)
        .await
        .unwrap();
    assert_eq!(outcome.element.name, "Steam");
    assert_eq!(outcome.element.emoji, "🌫️");
    assert!(outcome.was_safe);

    let logs = h
        .store()
        .transaction(|uow| uow.logs_for_order_key(&OrderKey::new(h.water.id, h.fire.id)))
        .unwrap();
    assert_eq!(logs[0].moderation, ModerationStage::Passed);
}

#[tokio::test]
async fn server_error_falls_back_to_simulation() {
    let server = MockServer::start().await;
    mount_gemini_status(&server, "gen-model", 503).await;
    mount_gemini_text(&server, "mod-model", "safe").await;
    let h = harness(&server, EngineSettings::default());

    let outcome = h
        .engine
        .combine(&SessionId::new("x"), h.water.id, h.fire.id, false)
        .await
        .unwrap();
    assert_eq!(outcome.element.name, "Water Fire Blend");
    assert!(outcome.was_safe);
    assert!(outcome.is_first_ever_combination);
}

#[tokio::test]
async fn malformed_answer_falls_back_to_simulation() {
    let server = MockServer::start().await;
    mount_gemini_text(&server, "gen-model", "🔥").await;
    mount_gemini_text(&server, "mod-model", "safe").await;
    let h = harness(&server, EngineSettings::default());

    let outcome = h
        .engine
        .combine(&SessionId::new("x"), h.earth.id, h.fire.id, false)
        .await
        .unwrap();
    assert_eq!(outcome.element.name, "Earth Fire Blend");
}

#[tokio::test]
async fn slow_provider_times_out_into_simulation() {
    let server = MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;
    let mut settings = EngineSettings::default();
    settings.provider_timeout = Duration::from_millis(100);
    settings.moderation.on_failure = fusion_engine::FailurePolicy::Open;
    let h = harness(&server, settings);

    let outcome = h
        .engine
        .combine(&SessionId::new("x"), h.water.id, h.air.id, false)
        .await
        .unwrap();
    assert_eq!(outcome.element.name, "Water Air Blend");
    assert!(outcome.was_safe);

    let logs = h
        .store()
        .transaction(|uow| uow.logs_for_order_key(&OrderKey::new(h.water.id, h.air.id)))
        .unwrap();
    assert_eq!(logs[0].moderation, ModerationStage::Unavailable);
}

#[tokio::test]
async fn ambiguous_moderation_answer_fails_closed() {
    let server = MockServer::start().await;
    mount_gemini_text(&server, "gen-model", "🌫️ Steam").await;
    mount_gemini_text(&server, "mod-model", "probably fine").await;
    let h = harness(&server, EngineSettings::default());

    let outcome = h
        .engine
        .combine(&SessionId::new("x"), h.water.id, h.fire.id, false)
        .await
        .unwrap();
    assert!(!outcome.was_safe);
    assert_eq!(outcome.element.name, "Mystery Fog");
}
