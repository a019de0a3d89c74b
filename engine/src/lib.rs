//! Combination resolution engine for Fusion.
//!
//! Turns an unordered pair of elements into a result element: memoized pairs
//! are served from the cache, new pairs go to the generation provider (or the
//! local simulation), pass the safety checks, and are stored so every later
//! request for the same pair sees the same answer.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

pub mod cache;
mod clock;
mod combine;
pub mod config;
pub mod discovery;
mod generation;
mod rate_limit;
pub mod registry;
mod safety;
mod seed;
mod session;
mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use combine::{CombinationEngine, CombineError, CombineOutcome};
pub use config::{
    ConfigError, EngineSettings, FailurePolicy, FallbackElement, FusionConfig, ModerationSettings,
    RateLimitSettings,
};
pub use generation::{
    CandidateSource, ElementGenerator, GenerateFut, Generated, GenerationProvider, ModerateFut,
    simulate,
};
pub use rate_limit::RateLimiter;
pub use safety::{MAX_TAG_CHARS, SafetyFilter};
pub use seed::{STARTER_TAG, StarterElement, seed_starter_elements};
pub use session::{NewSession, SessionError};
pub use stats::{PopularElement, PopularPair, UsageStats};

pub use fusion_providers::{self, GenerationError, gemini::ModerationVerdict};
pub use fusion_store::{self, Store, StoreError};
pub use fusion_types::{
    self, Candidate, CombinationId, Element, ElementId, ModerationStage, NonEmptyString, OrderKey,
    Session, SessionId,
};
