//! SQLite-backed persistence: canonical entities, bitemporal facts, and
//! durable per-user memory.
//!
//! A single [`Database`] value wraps one connection behind a mutex and is
//! cheaply cloneable; embedded migrations run at open and are recorded in
//! `schema_migrations`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;

pub mod entities;
pub mod facts;
pub mod memory;

pub use entities::{EntityMatch, ResolvedEntity};
pub use facts::TrustedFactUpdate;
pub use memory::MemoryEntry;

/// Ordered, append-only list of embedded migrations. Names are recorded in
/// `schema_migrations` so re-opening an existing database skips them.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial",
    r#"
    CREATE TABLE entities (
        id            TEXT PRIMARY KEY,
        type          TEXT NOT NULL,
        canonical_name TEXT NOT NULL,
        aliases       TEXT NOT NULL DEFAULT '[]',
        external_ids  TEXT NOT NULL DEFAULT '{}'
    );
    CREATE UNIQUE INDEX idx_entities_type_name
        ON entities(type, lower(canonical_name));

    CREATE TABLE facts (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id   TEXT NOT NULL REFERENCES entities(id),
        name        TEXT NOT NULL,
        value       TEXT NOT NULL,
        dtype       TEXT NOT NULL,
        confidence  REAL,
        sources     TEXT NOT NULL DEFAULT '[]',
        notes       TEXT,
        observed_at TEXT NOT NULL,
        valid_from  TEXT NOT NULL,
        valid_to    TEXT
    );
    CREATE UNIQUE INDEX idx_facts_current
        ON facts(entity_id, name) WHERE valid_to IS NULL;
    CREATE INDEX idx_facts_entity ON facts(entity_id);

    CREATE TABLE user_memory (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        username   TEXT NOT NULL,
        text       TEXT NOT NULL,
        tags       TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        UNIQUE(username, text)
    );
    "#,
)];

/// Handle to the sleuth database. Clone freely; all clones share one
/// serialized connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `url` (a SQLite file path) and run
    /// any pending migrations.
    pub fn open(url: &str) -> Result<Self> {
        if let Some(parent) = Path::new(url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create database directory {}", parent.display()))?;
            }
        }
        let conn = Connection::open(url)
            .with_context(|| format!("open database at {url}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                 migration_name TEXT PRIMARY KEY,
                 executed_at    TEXT NOT NULL
             )",
            [],
        )?;

        for (name, sql) in MIGRATIONS {
            let applied: bool = conn
                .query_row(
                    "SELECT 1 FROM schema_migrations WHERE migration_name = ?1",
                    [name],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if applied {
                continue;
            }
            conn.execute_batch(sql)
                .with_context(|| format!("apply migration {name}"))?;
            conn.execute(
                "INSERT INTO schema_migrations (migration_name, executed_at) VALUES (?1, ?2)",
                rusqlite::params![name, Utc::now().to_rfc3339()],
            )?;
            tracing::info!(migration = name, "applied database migration");
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-statement; the
        // connection itself is still usable for independent statements.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}
