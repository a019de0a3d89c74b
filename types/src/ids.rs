use std::fmt;

use serde::{Deserialize, Serialize};

/// Database identity of an [`Element`](crate::Element).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(i64);

impl ElementId {
    /// Id carried by placeholder elements that were never persisted
    /// (the rate-limit fallback).
    pub const UNSAVED: Self = Self(-1);

    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_saved(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombinationId(i64);

impl CombinationId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CombinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque session identity. Generated ids are UUIDs, but any non-empty
/// string supplied by the caller is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Canonical, order-independent key for an unordered pair of elements.
///
/// Built from the ids (never the names): `"{low}::{high}"`. The separator
/// cannot occur inside a decimal integer, so distinct pairs never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderKey(String);

impl OrderKey {
    pub const SEPARATOR: &'static str = "::";

    #[must_use]
    pub fn new(a: ElementId, b: ElementId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{low}{}{high}", Self::SEPARATOR))
    }

    /// Rebuild a key read back from storage. Returns `None` unless the text
    /// is exactly what [`OrderKey::new`] would have produced.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (low, high) = raw.split_once(Self::SEPARATOR)?;
        let low = ElementId::new(low.parse().ok()?);
        let high = ElementId::new(high.parse().ok()?);
        let key = Self::new(low, high);
        (key.0 == raw).then_some(key)
    }

    /// The two ids, ascending.
    #[must_use]
    pub fn pair(&self) -> Option<(ElementId, ElementId)> {
        let (low, high) = self.0.split_once(Self::SEPARATOR)?;
        Some((
            ElementId::new(low.parse().ok()?),
            ElementId::new(high.parse().ok()?),
        ))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
