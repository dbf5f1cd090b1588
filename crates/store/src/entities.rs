//! Canonical entity resolution.
//!
//! Entity ids are deterministic: a short type prefix plus a slug of the
//! name (`cmp_artisan_ai`). Ids are never reassigned; case-insensitive name
//! uniqueness within a type is enforced by the schema.

use anyhow::{bail, Context, Result};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::Database;

/// A resolved entity reference, as returned by lookups that never create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

/// One ranked hit from [`Database::search_entities_by_name`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMatch {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Short id prefix for an entity type: `company` → `cmp`, `person` → `per`,
/// anything else uses its first three characters.
pub fn type_prefix(entity_type: &str) -> String {
    match entity_type {
        "company" => "cmp".to_string(),
        "person" => "per".to_string(),
        other => other.chars().take(3).collect(),
    }
}

/// Lowercase alphanumeric slug with non-alphanumeric runs collapsed to `_`.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for c in name.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

impl Database {
    /// Map `(name, type)` to a canonical entity id, creating the entity on
    /// first sight. Deterministic given current state: repeated calls return
    /// the same id.
    pub fn resolve_entity(&self, name: &str, entity_type: &str) -> Result<String> {
        let name = name.trim();
        let entity_type = entity_type.trim().to_lowercase();
        if name.is_empty() {
            bail!("entity name must not be empty");
        }
        if entity_type.is_empty() {
            bail!("entity type must not be empty");
        }

        let id = format!("{}_{}", type_prefix(&entity_type), slug(name));
        let conn = self.lock();

        let exists: bool = conn
            .query_row("SELECT 1 FROM entities WHERE id = ?1", [&id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if exists {
            return Ok(id);
        }

        // Same name (case-insensitive) under the same type may already exist
        // with a different slug spelling; reuse its id rather than split the
        // entity.
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM entities
                 WHERE type = ?1 AND lower(canonical_name) = lower(?2)",
                params![entity_type, name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing_id) = existing {
            return Ok(existing_id);
        }

        conn.execute(
            "INSERT INTO entities (id, type, canonical_name, aliases, external_ids)
             VALUES (?1, ?2, ?3, '[]', '{}')",
            params![id, entity_type, name],
        )
        .with_context(|| format!("insert entity {id}"))?;
        Ok(id)
    }

    /// Case-insensitive lookup by canonical name or alias. Never creates.
    pub fn try_resolve_existing(&self, name: &str) -> Result<Option<ResolvedEntity>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let conn = self.lock();

        let hit: Option<ResolvedEntity> = conn
            .query_row(
                "SELECT id, canonical_name, type FROM entities
                 WHERE lower(canonical_name) = lower(?1)",
                [name],
                |row| {
                    Ok(ResolvedEntity {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        entity_type: row.get(2)?,
                    })
                },
            )
            .optional()?;
        if hit.is_some() {
            return Ok(hit);
        }

        // Alias match via json_each over the stored alias array.
        let hit = conn
            .query_row(
                "SELECT e.id, e.canonical_name, e.type
                 FROM entities e, json_each(e.aliases)
                 WHERE lower(json_each.value) = lower(?1)",
                [name],
                |row| {
                    Ok(ResolvedEntity {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        entity_type: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(hit)
    }

    /// Ranked fuzzy lookup. SQLite carries no trigram index, so this is the
    /// substring fallback ordered by shorter canonical name first.
    pub fn search_entities_by_name(&self, query: &str, limit: usize) -> Result<Vec<EntityMatch>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("%{}%", query.to_lowercase());
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, canonical_name, type FROM entities
             WHERE lower(canonical_name) LIKE ?1
             ORDER BY length(canonical_name) ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![pattern, limit as i64], |row| {
            Ok(EntityMatch {
                id: row.get(0)?,
                name: row.get(1)?,
                entity_type: row.get(2)?,
                score: None,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Add an alias to an existing entity (no-op when already present).
    pub fn add_entity_alias(&self, entity_id: &str, alias: &str) -> Result<()> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Ok(());
        }
        let conn = self.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT aliases FROM entities WHERE id = ?1",
                [entity_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            bail!("unknown entity: {entity_id}");
        };
        let mut aliases: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
        if aliases.iter().any(|a| a.eq_ignore_ascii_case(alias)) {
            return Ok(());
        }
        aliases.push(alias.to_string());
        conn.execute(
            "UPDATE entities SET aliases = ?1 WHERE id = ?2",
            params![serde_json::to_string(&aliases)?, entity_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_collapses_runs_and_lowercases() {
        assert_eq!(slug("Artisan AI"), "artisan_ai");
        assert_eq!(slug("  OpenAI, Inc. "), "openai_inc");
        assert_eq!(slug("a--b__c"), "a_b_c");
        assert_eq!(slug("Ünïcode Näme"), "ünïcode_näme");
    }

    #[test]
    fn type_prefixes() {
        assert_eq!(type_prefix("company"), "cmp");
        assert_eq!(type_prefix("person"), "per");
        assert_eq!(type_prefix("product"), "pro");
        assert_eq!(type_prefix("organization"), "org");
        assert_eq!(type_prefix("ab"), "ab");
    }

    #[test]
    fn resolve_is_deterministic() {
        let db = Database::open_in_memory().unwrap();
        let a = db.resolve_entity("Artisan AI", "company").unwrap();
        let b = db.resolve_entity("Artisan AI", "company").unwrap();
        assert_eq!(a, "cmp_artisan_ai");
        assert_eq!(a, b);
    }

    #[test]
    fn resolve_normalises_type_case() {
        let db = Database::open_in_memory().unwrap();
        let a = db.resolve_entity("Acme", " Company ").unwrap();
        let b = db.resolve_entity("Acme", "company").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn resolve_reuses_case_insensitive_name_match() {
        let db = Database::open_in_memory().unwrap();
        let a = db.resolve_entity("OpenAI", "company").unwrap();
        // Same name, different casing: same entity, same id.
        let b = db.resolve_entity("OPENAI", "company").unwrap();
        assert_eq!(a, b);
        let matches = db.search_entities_by_name("openai", 10).unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn resolve_rejects_blank_inputs() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.resolve_entity("", "company").is_err());
        assert!(db.resolve_entity("Acme", "  ").is_err());
    }

    #[test]
    fn try_resolve_existing_never_creates() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.try_resolve_existing("Zzz Unknown").unwrap().is_none());
        let matches = db.search_entities_by_name("zzz", 5).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn try_resolve_existing_matches_aliases() {
        let db = Database::open_in_memory().unwrap();
        let id = db.resolve_entity("International Business Machines", "company").unwrap();
        db.add_entity_alias(&id, "IBM").unwrap();
        let hit = db.try_resolve_existing("ibm").unwrap().unwrap();
        assert_eq!(hit.id, id);
        assert_eq!(hit.entity_type, "company");
    }

    #[test]
    fn search_orders_shorter_names_first() {
        let db = Database::open_in_memory().unwrap();
        db.resolve_entity("Acme Corporation Worldwide", "company").unwrap();
        db.resolve_entity("Acme", "company").unwrap();
        db.resolve_entity("Acme Corp", "company").unwrap();
        let matches = db.search_entities_by_name("acme", 10).unwrap();
        let names: Vec<&str> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "Acme Corp", "Acme Corporation Worldwide"]);
    }
}
