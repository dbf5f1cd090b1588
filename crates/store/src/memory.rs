//! Durable per-user memory: short bullet-point facts distilled from
//! conversation, deduplicated on `(username, text)`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::Database;

/// Maximum entries returned per user.
const MAX_ENTRIES: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: i64,
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Database {
    /// Upsert a memory entry. A duplicate `(username, text)` pair refreshes
    /// `created_at` instead of inserting a second row.
    pub fn add_memory(&self, username: &str, text: &str, tags: &[String]) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO user_memory (username, text, tags, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(username, text)
             DO UPDATE SET created_at = excluded.created_at",
            params![
                username,
                text,
                serde_json::to_string(tags)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent entries for a user, newest first, capped at 200.
    pub fn get_memories(&self, username: &str) -> Result<Vec<MemoryEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, username, text, tags, created_at FROM user_memory
             WHERE username = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![username, MAX_ENTRIES as i64], |row| {
            let tags_raw: String = row.get(3)?;
            let created_raw: String = row.get(4)?;
            Ok(MemoryEntry {
                id: row.get(0)?,
                username: row.get(1)?,
                text: row.get(2)?,
                tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
                created_at: DateTime::parse_from_rfc3339(&created_raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
