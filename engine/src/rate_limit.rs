//! Per-session generation quota with a rolling reset.

use chrono::{DateTime, Utc};
use fusion_types::Session;

use crate::config::RateLimitSettings;

// 9999-12-31T23:59:59Z; later instants do not fit an RFC 3339 timestamp.
const LATEST_RESET_SECS: i64 = 253_402_300_799;

fn latest_reset() -> DateTime<Utc> {
    DateTime::from_timestamp(LATEST_RESET_SECS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Counts provider generations per session. Cache hits are free.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    per_session: u32,
    window: chrono::Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            per_session: settings.per_session,
            window: settings.window,
        }
    }

    #[must_use]
    pub fn per_session(&self) -> u32 {
        self.per_session
    }

    /// Reset time for a window opening at `now`, capped at the last instant
    /// the store can persist.
    #[must_use]
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let latest = latest_reset();
        now.checked_add_signed(self.window)
            .map_or(latest, |reset| reset.min(latest))
    }

    /// Zero the counter once the window has elapsed. Returns whether a reset
    /// happened.
    pub fn refresh(&self, session: &mut Session, now: DateTime<Utc>) -> bool {
        if now < session.rate_limit_reset_at {
            return false;
        }
        session.generation_calls = 0;
        session.rate_limit_reset_at = self.next_reset(now);
        true
    }

    #[must_use]
    pub fn is_exhausted(&self, session: &Session) -> bool {
        session.generation_calls >= self.per_session
    }

    pub fn record_generation(&self, session: &mut Session) {
        session.generation_calls = session.generation_calls.saturating_add(1);
    }
}
