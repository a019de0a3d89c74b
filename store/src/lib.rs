//! SQLite persistence for Fusion.
//!
//! The store owns a single connection guarded by a mutex. All access goes
//! through [`Store::transaction`], which hands the caller a [`UnitOfWork`]
//! scoped to one `BEGIN IMMEDIATE` transaction: the closure's writes commit
//! together when it returns `Ok` and roll back together when it returns `Err`.
//!
//! The mutex is a `std::sync::Mutex`; a unit of work is synchronous, so the
//! lock is never held across an `.await`.
//!
//! # Tables
//!
//! | Table              | Entity            | Uniqueness                  |
//! |--------------------|-------------------|-----------------------------|
//! | `elements`         | `Element`         | `normalized_name`           |
//! | `combinations`     | `Combination`     | `order_key`                 |
//! | `sessions`         | `Session`         | `id`                        |
//! | `session_elements` | `SessionElement`  | `(session_id, element_id)`  |
//! | `combination_logs` | `CombinationLog`  | append-only                 |

mod sqlite_security;
mod unit_of_work;

pub use unit_of_work::{NewElement, NewLogEntry, UnitOfWork};

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use fusion_types::OrderKey;
use rusqlite::{Connection, TransactionBehavior};

use crate::sqlite_security::prepare_db_path;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to {action} at {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt {what} row: {detail}")]
    Corrupt { what: &'static str, detail: String },
    /// Another writer already resolved this pair.
    #[error("combination {order_key} already exists")]
    Conflict { order_key: OrderKey },
    #[error("store connection lock poisoned")]
    Poisoned,
}

/// Persistent store for elements, combinations, sessions and the audit log.
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS elements (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            normalized_name TEXT NOT NULL UNIQUE,
            emoji TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '[]',
            is_seed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        -- result_element_id deliberately has no foreign key: a dangling
        -- result is detected and healed on read.
        CREATE TABLE IF NOT EXISTS combinations (
            id INTEGER PRIMARY KEY,
            element_a_id INTEGER NOT NULL REFERENCES elements(id),
            element_b_id INTEGER NOT NULL REFERENCES elements(id),
            result_element_id INTEGER NOT NULL,
            order_key TEXT NOT NULL,
            usage_count INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            CONSTRAINT uq_combination_order UNIQUE (order_key)
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            last_active_at TEXT NOT NULL,
            generation_calls INTEGER NOT NULL DEFAULT 0,
            rate_limit_reset_at TEXT NOT NULL,
            safety_override INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS session_elements (
            session_id TEXT NOT NULL REFERENCES sessions(id),
            element_id INTEGER NOT NULL REFERENCES elements(id),
            discovered_at TEXT NOT NULL,
            is_first_discovery INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (session_id, element_id)
        );

        CREATE TABLE IF NOT EXISTS combination_logs (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL,
            element_a_id INTEGER NOT NULL,
            element_b_id INTEGER NOT NULL,
            result_element_id INTEGER NOT NULL,
            was_safe INTEGER NOT NULL,
            moderation TEXT NOT NULL,
            order_key TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_combinations_usage
        ON combinations(usage_count);

        CREATE INDEX IF NOT EXISTS idx_session_elements_session
        ON session_elements(session_id);

        CREATE INDEX IF NOT EXISTS idx_combination_logs_order_key
        ON combination_logs(order_key);
    ";

    /// Open or create the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        prepare_db_path(path)?;

        let db = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "Opened fusion store");
        Self::initialize(db)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(db: Connection) -> Result<Self, StoreError> {
        db.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        db.execute_batch(Self::SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Run `work` inside one immediate transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back otherwise. The error type
    /// is the caller's so domain errors can abort the transaction too.
    pub fn transaction<T, E>(
        &self,
        work: impl FnOnce(&UnitOfWork<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let uow = UnitOfWork::new(tx);
        let value = work(&uow)?;
        uow.commit()?;
        Ok(value)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
