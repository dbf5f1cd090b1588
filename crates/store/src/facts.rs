//! Bitemporal fact storage.
//!
//! Writes are supersede-on-write: the current row for `(entity_id, name)` is
//! closed by setting its `valid_to`, then the new row is inserted with
//! `valid_to = NULL`, both inside one transaction. The partial unique index
//! on `(entity_id, name) WHERE valid_to IS NULL` backs the invariant at the
//! storage layer. History is never rewritten.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use sleuth_core::{Dtype, Fact, FactValue, MagicVariable, SourceRef};

use crate::Database;

/// Operator/user feedback applied as a trusted fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedFactUpdate {
    pub entity: String,
    pub field: String,
    pub value: FactValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

fn fact_from_row(row: &Row<'_>) -> rusqlite::Result<Fact> {
    let value_raw: String = row.get(3)?;
    let dtype_raw: String = row.get(4)?;
    let sources_raw: String = row.get(6)?;
    let observed_at: String = row.get(8)?;
    let valid_from: String = row.get(9)?;
    let valid_to: Option<String> = row.get(10)?;

    Ok(Fact {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        name: row.get(2)?,
        value: serde_json::from_str(&value_raw)
            .unwrap_or(FactValue::Text(value_raw)),
        dtype: serde_json::from_value(serde_json::Value::String(dtype_raw))
            .unwrap_or(Dtype::Text),
        confidence: row.get(5)?,
        sources: serde_json::from_str(&sources_raw).unwrap_or_default(),
        notes: row.get(7)?,
        observed_at: parse_ts(&observed_at),
        valid_from: parse_ts(&valid_from),
        valid_to: valid_to.as_deref().map(parse_ts),
    })
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

const FACT_COLUMNS: &str =
    "id, entity_id, name, value, dtype, confidence, sources, notes, observed_at, valid_from, valid_to";

impl Database {
    /// Persist a variable as the new current fact for its subject.
    ///
    /// Ensures `subject.canonical_id` first (resolving, and creating, the
    /// entity when needed). Returns the entity id the fact was written under.
    pub fn store_fact(
        &self,
        variable: &MagicVariable,
        observed_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let Some(subject) = &variable.subject else {
            bail!("variable {:?} has no subject", variable.name);
        };
        let entity_id = match &subject.canonical_id {
            Some(id) => id.clone(),
            None => self.resolve_entity(&subject.name, &subject.entity_type)?,
        };

        let observed = observed_at
            .or(variable.observed_at)
            .unwrap_or_else(Utc::now);
        let observed_raw = observed.to_rfc3339();

        let mut conn = self.lock();
        let tx = conn.transaction().context("begin fact transaction")?;
        tx.execute(
            "UPDATE facts SET valid_to = ?1
             WHERE entity_id = ?2 AND name = ?3 AND valid_to IS NULL",
            params![observed_raw, entity_id, variable.name],
        )?;
        tx.execute(
            "INSERT INTO facts
                 (entity_id, name, value, dtype, confidence, sources, notes,
                  observed_at, valid_from, valid_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, NULL)",
            params![
                entity_id,
                variable.name,
                serde_json::to_string(&variable.value)?,
                dtype_str(variable.dtype),
                variable.confidence,
                serde_json::to_string(&variable.sources)?,
                variable.notes,
                observed_raw,
            ],
        )
        .with_context(|| format!("insert fact {}.{}", entity_id, variable.name))?;
        tx.commit()?;
        Ok(entity_id)
    }

    /// The single current fact for `(entity_id, name)`, if any.
    pub fn get_fact(&self, entity_id: &str, name: &str) -> Result<Option<Fact>> {
        let conn = self.lock();
        let fact = conn
            .query_row(
                &format!(
                    "SELECT {FACT_COLUMNS} FROM facts
                     WHERE entity_id = ?1 AND name = ?2 AND valid_to IS NULL"
                ),
                params![entity_id, name],
                fact_from_row,
            )
            .optional()?;
        Ok(fact)
    }

    /// All current facts for an entity, ordered by name.
    pub fn get_facts_for_entity(&self, entity_id: &str) -> Result<Vec<Fact>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FACT_COLUMNS} FROM facts
             WHERE entity_id = ?1 AND valid_to IS NULL
             ORDER BY name"
        ))?;
        let rows = stmt.query_map([entity_id], fact_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Full history for `(entity_id, name)`, newest first. Closed rows keep
    /// their original values.
    pub fn get_fact_history(&self, entity_id: &str, name: &str) -> Result<Vec<Fact>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FACT_COLUMNS} FROM facts
             WHERE entity_id = ?1 AND name = ?2
             ORDER BY valid_from DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![entity_id, name], fact_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Synonym lookup for cache misses: distinct current-row names containing
    /// the normalised `base`, excluding the exact match.
    pub fn find_similar_fact_names(
        &self,
        entity_id: &str,
        base: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let normalised: String = base
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if normalised.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("%{normalised}%");
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT name FROM facts
             WHERE entity_id = ?1 AND valid_to IS NULL
               AND name LIKE ?2 AND name <> ?3
             ORDER BY name
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![entity_id, pattern, normalised, limit as i64],
            |row| row.get::<_, String>(0),
        )?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Apply operator feedback as a trusted fact.
    ///
    /// The entity must already be resolvable (this never creates one). The
    /// confidence walk `(current + 1) / 2` is monotonic non-decreasing toward
    /// 1 and starts from 0.5 when no current fact exists.
    pub fn set_trusted_fact(&self, update: &TrustedFactUpdate) -> Result<String> {
        let Some(entity) = self.try_resolve_existing(&update.entity)? else {
            bail!("cannot set trusted fact: unresolved entity {:?}", update.entity);
        };

        let current_confidence = self
            .get_fact(&entity.id, &update.field)?
            .and_then(|f| f.confidence)
            .unwrap_or(0.5);
        let confidence = (current_confidence + 1.0) / 2.0;

        let sources = update
            .source
            .as_ref()
            .map(|url| {
                vec![SourceRef {
                    title: Some("Trusted fact".to_string()),
                    url: url.clone(),
                    snippet: None,
                }]
            })
            .unwrap_or_default();

        let variable = MagicVariable {
            subject: Some(sleuth_core::Subject {
                name: entity.name.clone(),
                entity_type: entity.entity_type.clone(),
                canonical_id: Some(entity.id.clone()),
            }),
            name: update.field.clone(),
            dtype: update.value.inferred_dtype(),
            value: update.value.clone(),
            confidence: Some(confidence),
            sources,
            notes: update
                .updated_by
                .as_ref()
                .map(|by| format!("trusted fact set by {by}")),
            observed_at: None,
        };
        self.store_fact(&variable, None)
    }
}

fn dtype_str(dtype: Dtype) -> &'static str {
    match dtype {
        Dtype::Boolean => "boolean",
        Dtype::String => "string",
        Dtype::Number => "number",
        Dtype::Date => "date",
        Dtype::Url => "url",
        Dtype::Text => "text",
    }
}
