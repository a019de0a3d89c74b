//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use fusion_engine::{
    Candidate, CombinationEngine, Element, ElementGenerator, EngineSettings, GenerateFut,
    GenerationError, ManualClock, ModerateFut, ModerationVerdict, StarterElement, Store,
};
use fusion_providers::ApiKey;
use fusion_providers::gemini::{GeminiClient, GeminiConfig};
use fusion_providers::retry::RetryConfig;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// What the scripted backend answers to one generation call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Raw model text, parsed like a real response.
    Text(&'static str),
    Fail,
}

/// Generator backend that replays a fixed script.
///
/// Generation replies are consumed in order; once the script runs out every
/// call fails. Moderation always answers `verdict` (`None` = transport error).
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    verdict: Option<ModerationVerdict>,
    delay: Duration,
    generations: AtomicU32,
    moderations: AtomicU32,
}

impl ScriptedGenerator {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            verdict: Some(ModerationVerdict::Safe),
            delay: Duration::ZERO,
            generations: AtomicU32::new(0),
            moderations: AtomicU32::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self::new([])
    }

    pub fn with_verdict(mut self, verdict: Option<ModerationVerdict>) -> Self {
        self.verdict = verdict;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn generations(&self) -> u32 {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn moderations(&self) -> u32 {
        self.moderations.load(Ordering::SeqCst)
    }
}

impl ElementGenerator for ScriptedGenerator {
    fn generate<'a>(&'a self, _first: &'a Element, _second: &'a Element) -> GenerateFut<'a> {
        self.generations.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match reply {
                Some(Reply::Text(raw)) => Candidate::parse(raw).map_err(GenerationError::from),
                Some(Reply::Fail) | None => Err(GenerationError::MissingText),
            }
        })
    }

    fn moderate<'a>(&'a self, _candidate: &'a Candidate) -> ModerateFut<'a> {
        self.moderations.fetch_add(1, Ordering::SeqCst);
        let verdict = self.verdict.clone();
        Box::pin(async move { verdict.ok_or(GenerationError::MissingText) })
    }
}

/// An engine over a seeded in-memory store with a manual clock.
pub struct Harness {
    pub engine: CombinationEngine,
    pub clock: Arc<ManualClock>,
    pub water: Element,
    pub fire: Element,
    pub earth: Element,
    pub air: Element,
}

impl Harness {
    pub fn new(settings: EngineSettings, backend: Option<Arc<dyn ElementGenerator>>) -> Self {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = CombinationEngine::new(store, settings, backend).with_clock(clock.clone());
        let mut seeded = engine
            .seed_starters(StarterElement::defaults())
            .unwrap()
            .into_iter();
        Self {
            engine,
            clock,
            water: seeded.next().unwrap(),
            fire: seeded.next().unwrap(),
            earth: seeded.next().unwrap(),
            air: seeded.next().unwrap(),
        }
    }

    /// No credential configured: simulation only, moderation skipped.
    pub fn offline() -> Self {
        Self::new(EngineSettings::default(), None)
    }

    pub fn with_generator(settings: EngineSettings, generator: Arc<ScriptedGenerator>) -> Self {
        Self::new(settings, Some(generator))
    }

    pub fn store(&self) -> &Store {
        self.engine.store()
    }
}

pub fn settings_with_blocklist(terms: &[&str]) -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.moderation.blocklist = terms.iter().map(|t| (*t).to_string()).collect();
    settings
}

/// Gemini client aimed at a mock server over plain HTTP, without retries.
pub fn gemini_client(server: &MockServer) -> GeminiClient {
    let mut config = GeminiConfig::new(ApiKey::new("test-key").unwrap(), "gen-model");
    config.moderation_model = "mod-model".to_string();
    config.base_url = server.uri();
    config.retry = RetryConfig {
        max_retries: 0,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        jitter_factor: 0.0,
    };
    GeminiClient::with_client(config, reqwest::Client::new())
}

/// Mount a `generateContent` answer for `model`.
pub async fn mount_gemini_text(server: &MockServer, model: &str, text: &str) {
    let body = json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
    });
    Mock::given(method("POST"))
        .and(path(format!("/models/{model}:generateContent")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_gemini_status(server: &MockServer, model: &str, status: u16) {
    Mock::given(method("POST"))
        .and(path(format!("/models/{model}:generateContent")))
        .respond_with(ResponseTemplate::new(status).set_body_string("unavailable"))
        .mount(server)
        .await;
}
