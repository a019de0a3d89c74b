//! Row-level access for one transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use fusion_types::{
    Combination, CombinationId, CombinationLog, Element, ElementId, ModerationStage, OrderKey,
    Session, SessionElement, SessionId,
};
use rusqlite::{OptionalExtension, Row, Transaction, params};

use crate::StoreError;

const ELEMENT_COLUMNS: &str =
    "id, name, normalized_name, emoji, description, tags, is_seed, created_at";
const COMBINATION_COLUMNS: &str =
    "id, element_a_id, element_b_id, result_element_id, order_key, usage_count, created_at";
const SESSION_COLUMNS: &str =
    "id, created_at, last_active_at, generation_calls, rate_limit_reset_at, safety_override";

/// Fields of an element about to be inserted. Values are stored as given;
/// normalization and truncation are the registry's job.
#[derive(Debug, Clone)]
pub struct NewElement {
    pub name: String,
    pub normalized_name: String,
    pub emoji: String,
    pub description: String,
    pub tags: Vec<String>,
    pub is_seed: bool,
}

/// One audit row. `id` and `created_at` are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub session_id: SessionId,
    pub element_a: ElementId,
    pub element_b: ElementId,
    pub result: ElementId,
    pub was_safe: bool,
    pub moderation: ModerationStage,
    pub order_key: OrderKey,
}

/// Scoped access to the store inside one open transaction.
///
/// Obtained from [`Store::transaction`](crate::Store::transaction); dropped
/// without commit means rolled back.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> UnitOfWork<'conn> {
    pub(crate) fn new(tx: Transaction<'conn>) -> Self {
        Self { tx }
    }

    pub(crate) fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub fn session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        self.tx
            .query_row(&sql, [id.as_str()], SessionRow::read)
            .optional()?
            .map(SessionRow::into_session)
            .transpose()
    }

    pub fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO sessions
                 (id, created_at, last_active_at, generation_calls, rate_limit_reset_at, safety_override)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id.as_str(),
                timestamp(session.created_at),
                timestamp(session.last_active_at),
                session.generation_calls,
                timestamp(session.rate_limit_reset_at),
                session.safety_override,
            ],
        )?;
        Ok(())
    }

    /// Persist the mutable fields of an existing session. Returns whether a
    /// row was updated.
    pub fn save_session(&self, session: &Session) -> Result<bool, StoreError> {
        let changed = self.tx.execute(
            "UPDATE sessions
             SET last_active_at = ?2, generation_calls = ?3,
                 rate_limit_reset_at = ?4, safety_override = ?5
             WHERE id = ?1",
            params![
                session.id.as_str(),
                timestamp(session.last_active_at),
                session.generation_calls,
                timestamp(session.rate_limit_reset_at),
                session.safety_override,
            ],
        )?;
        Ok(changed > 0)
    }

    // ------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------

    pub fn element(&self, id: ElementId) -> Result<Option<Element>, StoreError> {
        let sql = format!("SELECT {ELEMENT_COLUMNS} FROM elements WHERE id = ?1");
        self.tx
            .query_row(&sql, [id.value()], ElementRow::read)
            .optional()?
            .map(ElementRow::into_element)
            .transpose()
    }

    pub fn element_by_normalized_name(
        &self,
        normalized_name: &str,
    ) -> Result<Option<Element>, StoreError> {
        let sql = format!("SELECT {ELEMENT_COLUMNS} FROM elements WHERE normalized_name = ?1");
        self.tx
            .query_row(&sql, [normalized_name], ElementRow::read)
            .optional()?
            .map(ElementRow::into_element)
            .transpose()
    }

    pub fn insert_element(
        &self,
        element: &NewElement,
        now: DateTime<Utc>,
    ) -> Result<Element, StoreError> {
        self.tx.execute(
            "INSERT INTO elements
                 (name, normalized_name, emoji, description, tags, is_seed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &element.name,
                &element.normalized_name,
                &element.emoji,
                &element.description,
                encode_tags(&element.tags)?,
                element.is_seed,
                timestamp(now),
            ],
        )?;
        let id = ElementId::new(self.tx.last_insert_rowid());
        self.element(id)?.ok_or_else(|| StoreError::Corrupt {
            what: "element",
            detail: format!("row {id} vanished after insert"),
        })
    }

    /// Overwrite the flavor fields of an existing element.
    pub fn update_element_content(
        &self,
        id: ElementId,
        emoji: &str,
        description: &str,
        tags: &[String],
    ) -> Result<(), StoreError> {
        self.tx.execute(
            "UPDATE elements SET emoji = ?2, description = ?3, tags = ?4 WHERE id = ?1",
            params![id.value(), emoji, description, encode_tags(tags)?],
        )?;
        Ok(())
    }

    pub fn mark_seed(&self, id: ElementId) -> Result<(), StoreError> {
        self.tx
            .execute("UPDATE elements SET is_seed = 1 WHERE id = ?1", [id.value()])?;
        Ok(())
    }

    /// All starter elements, oldest first.
    pub fn seed_elements(&self) -> Result<Vec<Element>, StoreError> {
        let sql = format!("SELECT {ELEMENT_COLUMNS} FROM elements WHERE is_seed = 1 ORDER BY id");
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map([], ElementRow::read)?;
        rows.map(|row| row?.into_element()).collect()
    }

    // ------------------------------------------------------------------
    // Combinations
    // ------------------------------------------------------------------

    pub fn combination(&self, order_key: &OrderKey) -> Result<Option<Combination>, StoreError> {
        let sql = format!("SELECT {COMBINATION_COLUMNS} FROM combinations WHERE order_key = ?1");
        self.tx
            .query_row(&sql, [order_key.as_str()], CombinationRow::read)
            .optional()?
            .map(CombinationRow::into_combination)
            .transpose()
    }

    /// Insert the memoized result for a pair with a usage count of one.
    ///
    /// A second row for the same order key is rejected by the unique
    /// constraint and reported as [`StoreError::Conflict`].
    pub fn insert_combination(
        &self,
        element_a: ElementId,
        element_b: ElementId,
        result: ElementId,
        now: DateTime<Utc>,
    ) -> Result<Combination, StoreError> {
        let order_key = OrderKey::new(element_a, element_b);
        let inserted = self.tx.execute(
            "INSERT INTO combinations
                 (element_a_id, element_b_id, result_element_id, order_key, usage_count, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![
                element_a.value(),
                element_b.value(),
                result.value(),
                order_key.as_str(),
                timestamp(now),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::Conflict { order_key });
            }
            Err(err) => return Err(err.into()),
        }

        Ok(Combination {
            id: CombinationId::new(self.tx.last_insert_rowid()),
            element_a,
            element_b,
            result,
            order_key,
            usage_count: 1,
            created_at: truncate_to_stored(now),
        })
    }

    /// Increment the usage counter and return the new value.
    pub fn bump_usage(&self, id: CombinationId) -> Result<u64, StoreError> {
        let count: i64 = self.tx.query_row(
            "UPDATE combinations SET usage_count = usage_count + 1 WHERE id = ?1
             RETURNING usage_count",
            [id.value()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub fn delete_combination(&self, id: CombinationId) -> Result<(), StoreError> {
        self.tx
            .execute("DELETE FROM combinations WHERE id = ?1", [id.value()])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Session discovery
    // ------------------------------------------------------------------

    pub fn session_element(
        &self,
        session_id: &SessionId,
        element_id: ElementId,
    ) -> Result<Option<SessionElement>, StoreError> {
        self.tx
            .query_row(
                "SELECT session_id, element_id, discovered_at, is_first_discovery
                 FROM session_elements WHERE session_id = ?1 AND element_id = ?2",
                params![session_id.as_str(), element_id.value()],
                SessionElementRow::read,
            )
            .optional()?
            .map(SessionElementRow::into_session_element)
            .transpose()
    }

    /// Record an unlock. Returns `false` when the session already holds the
    /// element; the existing row is left untouched.
    pub fn insert_session_element(
        &self,
        session_id: &SessionId,
        element_id: ElementId,
        is_first_discovery: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let inserted = self.tx.execute(
            "INSERT OR IGNORE INTO session_elements
                 (session_id, element_id, discovered_at, is_first_discovery)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session_id.as_str(),
                element_id.value(),
                timestamp(now),
                is_first_discovery,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Elements unlocked by a session: starters first, then in discovery order.
    pub fn discovered_elements(&self, session_id: &SessionId) -> Result<Vec<Element>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT e.id, e.name, e.normalized_name, e.emoji, e.description, e.tags,
                    e.is_seed, e.created_at
             FROM elements e
             JOIN session_elements se ON se.element_id = e.id
             WHERE se.session_id = ?1
             ORDER BY e.is_seed DESC, se.discovered_at ASC, e.id ASC",
        )?;
        let rows = stmt.query_map([session_id.as_str()], ElementRow::read)?;
        rows.map(|row| row?.into_element()).collect()
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    pub fn append_log(&self, entry: &NewLogEntry, now: DateTime<Utc>) -> Result<i64, StoreError> {
        self.tx.execute(
            "INSERT INTO combination_logs
                 (session_id, element_a_id, element_b_id, result_element_id,
                  was_safe, moderation, order_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.session_id.as_str(),
                entry.element_a.value(),
                entry.element_b.value(),
                entry.result.value(),
                entry.was_safe,
                entry.moderation.as_str(),
                entry.order_key.as_str(),
                timestamp(now),
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Audit rows for one pair, oldest first.
    pub fn logs_for_order_key(&self, order_key: &OrderKey) -> Result<Vec<CombinationLog>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT id, session_id, element_a_id, element_b_id, result_element_id,
                    was_safe, moderation, order_key, created_at
             FROM combination_logs WHERE order_key = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([order_key.as_str()], LogRow::read)?;
        rows.map(|row| row?.into_log()).collect()
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Result elements of the most used combinations, one entry per
    /// combination row.
    pub fn top_result_elements(&self, limit: u32) -> Result<Vec<(Element, u64)>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT e.id, e.name, e.normalized_name, e.emoji, e.description, e.tags,
                    e.is_seed, e.created_at, c.usage_count
             FROM combinations c
             JOIN elements e ON e.id = c.result_element_id
             ORDER BY c.usage_count DESC, c.id ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok((ElementRow::read(row)?, row.get::<_, i64>(8)?))
        })?;
        rows.map(|row| {
            let (element, usage) = row?;
            Ok((element.into_element()?, count(usage)))
        })
        .collect()
    }

    pub fn top_pairs(&self, limit: u32) -> Result<Vec<(OrderKey, u64)>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT order_key, usage_count FROM combinations
             ORDER BY usage_count DESC, id ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        rows.map(|row| {
            let (key, usage) = row?;
            Ok((parse_order_key(&key)?, count(usage)))
        })
        .collect()
    }

    pub fn combination_count(&self) -> Result<u64, StoreError> {
        let total: i64 = self
            .tx
            .query_row("SELECT COUNT(*) FROM combinations", [], |row| row.get(0))?;
        Ok(count(total))
    }
}

// ----------------------------------------------------------------------
// Row decoding
// ----------------------------------------------------------------------

struct ElementRow {
    id: i64,
    name: String,
    normalized_name: String,
    emoji: String,
    description: String,
    tags: String,
    is_seed: bool,
    created_at: String,
}

impl ElementRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            normalized_name: row.get(2)?,
            emoji: row.get(3)?,
            description: row.get(4)?,
            tags: row.get(5)?,
            is_seed: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_element(self) -> Result<Element, StoreError> {
        let tags: Vec<String> =
            serde_json::from_str(&self.tags).map_err(|err| StoreError::Corrupt {
                what: "element",
                detail: format!("tags of element {}: {err}", self.id),
            })?;
        Ok(Element {
            id: ElementId::new(self.id),
            name: self.name,
            normalized_name: self.normalized_name,
            emoji: self.emoji,
            description: self.description,
            tags,
            is_seed: self.is_seed,
            created_at: parse_timestamp("element", &self.created_at)?,
        })
    }
}

struct CombinationRow {
    id: i64,
    element_a: i64,
    element_b: i64,
    result: i64,
    order_key: String,
    usage_count: i64,
    created_at: String,
}

impl CombinationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            element_a: row.get(1)?,
            element_b: row.get(2)?,
            result: row.get(3)?,
            order_key: row.get(4)?,
            usage_count: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_combination(self) -> Result<Combination, StoreError> {
        Ok(Combination {
            id: CombinationId::new(self.id),
            element_a: ElementId::new(self.element_a),
            element_b: ElementId::new(self.element_b),
            result: ElementId::new(self.result),
            order_key: parse_order_key(&self.order_key)?,
            usage_count: count(self.usage_count),
            created_at: parse_timestamp("combination", &self.created_at)?,
        })
    }
}

struct SessionRow {
    id: String,
    created_at: String,
    last_active_at: String,
    generation_calls: u32,
    rate_limit_reset_at: String,
    safety_override: bool,
}

impl SessionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            last_active_at: row.get(2)?,
            generation_calls: row.get(3)?,
            rate_limit_reset_at: row.get(4)?,
            safety_override: row.get(5)?,
        })
    }

    fn into_session(self) -> Result<Session, StoreError> {
        Ok(Session {
            id: SessionId::new(self.id),
            created_at: parse_timestamp("session", &self.created_at)?,
            last_active_at: parse_timestamp("session", &self.last_active_at)?,
            generation_calls: self.generation_calls,
            rate_limit_reset_at: parse_timestamp("session", &self.rate_limit_reset_at)?,
            safety_override: self.safety_override,
        })
    }
}

struct SessionElementRow {
    session_id: String,
    element_id: i64,
    discovered_at: String,
    is_first_discovery: bool,
}

impl SessionElementRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            element_id: row.get(1)?,
            discovered_at: row.get(2)?,
            is_first_discovery: row.get(3)?,
        })
    }

    fn into_session_element(self) -> Result<SessionElement, StoreError> {
        Ok(SessionElement {
            session_id: SessionId::new(self.session_id),
            element_id: ElementId::new(self.element_id),
            discovered_at: parse_timestamp("session element", &self.discovered_at)?,
            is_first_discovery: self.is_first_discovery,
        })
    }
}

struct LogRow {
    id: i64,
    session_id: String,
    element_a: i64,
    element_b: i64,
    result: i64,
    was_safe: bool,
    moderation: String,
    order_key: String,
    created_at: String,
}

impl LogRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            element_a: row.get(2)?,
            element_b: row.get(3)?,
            result: row.get(4)?,
            was_safe: row.get(5)?,
            moderation: row.get(6)?,
            order_key: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_log(self) -> Result<CombinationLog, StoreError> {
        let moderation =
            ModerationStage::parse(&self.moderation).ok_or_else(|| StoreError::Corrupt {
                what: "combination log",
                detail: format!("unknown moderation stage {:?}", self.moderation),
            })?;
        Ok(CombinationLog {
            id: self.id,
            session_id: SessionId::new(self.session_id),
            element_a: ElementId::new(self.element_a),
            element_b: ElementId::new(self.element_b),
            result: ElementId::new(self.result),
            was_safe: self.was_safe,
            moderation,
            order_key: parse_order_key(&self.order_key)?,
            created_at: parse_timestamp("combination log", &self.created_at)?,
        })
    }
}

// ----------------------------------------------------------------------
// Encoding helpers
// ----------------------------------------------------------------------

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The value `at` will have after a round-trip through storage.
fn truncate_to_stored(at: DateTime<Utc>) -> DateTime<Utc> {
    parse_timestamp("timestamp", &timestamp(at)).unwrap_or(at)
}

fn parse_timestamp(what: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt {
            what,
            detail: format!("timestamp {raw:?}: {err}"),
        })
}

fn parse_order_key(raw: &str) -> Result<OrderKey, StoreError> {
    OrderKey::parse(raw).ok_or_else(|| StoreError::Corrupt {
        what: "combination",
        detail: format!("order key {raw:?}"),
    })
}

fn encode_tags(tags: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(tags).map_err(|err| StoreError::Corrupt {
        what: "element",
        detail: format!("tags not encodable: {err}"),
    })
}

fn count(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or_default()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
