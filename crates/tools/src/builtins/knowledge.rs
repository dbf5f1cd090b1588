//! `knowledge_query` — internal fact lookup against the canonical store.
//!
//! Resolution never creates entities: an unknown subject comes back as
//! `ENTITY_UNRESOLVED` with name suggestions. A miss on a specific variable
//! falls back to synonym lookup, then (depth permitting) a nested research
//! run that fetches and persists the fact before retrying.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use sleuth_store::Database;

use crate::{Tool, ToolParam, ToolReturn, ToolSpec};

/// Suggestions returned alongside `ENTITY_UNRESOLVED`.
const SUGGESTION_LIMIT: usize = 5;
/// Synonym candidates consulted on a variable-name miss.
const SIMILAR_NAME_LIMIT: usize = 5;

/// Nested research capability, implemented by the agent runtime.
///
/// Kept behind a trait so the tool crate stays below the runtime crate; the
/// runtime passes itself in with the depth already incremented.
#[async_trait]
pub trait FactResearcher: Send + Sync {
    /// Research one variable for an entity and persist what was found.
    async fn research_fact(&self, entity: &str, variable_name: &str) -> Result<()>;
}

pub struct KnowledgeQueryTool {
    db: Database,
    /// Absent when the depth bound forbids further recursion.
    researcher: Option<Arc<dyn FactResearcher>>,
}

impl KnowledgeQueryTool {
    pub fn new(db: Database, researcher: Option<Arc<dyn FactResearcher>>) -> Self {
        Self { db, researcher }
    }
}

#[async_trait]
impl Tool for KnowledgeQueryTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "knowledge_query".to_string(),
            description: "Look up facts already known about an entity in the internal \
                store. Give `variable_name` for one specific fact, or `question` to \
                filter the entity's facts by topic. Cheaper and faster than web search \
                for anything previously researched."
                .to_string(),
            params: vec![
                ToolParam::required("entity", "Entity name to look up").min_length(1),
                ToolParam::optional("variable_name", "Specific variable to fetch"),
                ToolParam::optional("question", "Free-text question to filter facts by"),
            ],
            counts_against_web_budget: false,
        }
    }

    async fn run(&self, args: &serde_json::Value) -> Result<ToolReturn> {
        let entity_name = args["entity"].as_str().unwrap_or_default();
        let variable_name = args["variable_name"].as_str().filter(|s| !s.is_empty());
        let question = args["question"].as_str().filter(|s| !s.is_empty());

        let Some(entity) = self.db.try_resolve_existing(entity_name)? else {
            let suggestions: Vec<String> = self
                .db
                .search_entities_by_name(entity_name, SUGGESTION_LIMIT)?
                .into_iter()
                .map(|m| m.name)
                .collect();
            return Ok(ToolReturn::new(
                json!({
                    "code": "ENTITY_UNRESOLVED",
                    "entity": entity_name,
                    "suggestions": suggestions,
                }),
                0,
            ));
        };

        if let Some(name) = variable_name {
            if let Some(fact) = self.db.get_fact(&entity.id, name)? {
                return Ok(ToolReturn::new(serde_json::to_value(&fact)?, 1));
            }

            let similar = self
                .db
                .find_similar_fact_names(&entity.id, name, SIMILAR_NAME_LIMIT)?;
            if !similar.is_empty() {
                let mut facts = Vec::new();
                for synonym in &similar {
                    if let Some(fact) = self.db.get_fact(&entity.id, synonym)? {
                        facts.push(fact);
                    }
                }
                if !facts.is_empty() {
                    let quality = facts.len() as u64;
                    return Ok(ToolReturn::new(
                        json!({
                            "requested": name,
                            "matched_names": similar,
                            "facts": facts,
                        }),
                        quality,
                    ));
                }
            }

            // Nothing stored: hand off to a nested research run, then retry.
            if let Some(researcher) = &self.researcher {
                debug!(entity = %entity.name, variable = name, "recursing to research fact");
                if let Err(e) = researcher.research_fact(&entity.name, name).await {
                    debug!(error = %e, "nested research failed");
                }
                if let Some(fact) = self.db.get_fact(&entity.id, name)? {
                    return Ok(ToolReturn::new(serde_json::to_value(&fact)?, 1));
                }
            }

            return Ok(ToolReturn::new(
                json!({
                    "code": "FACT_NOT_FOUND",
                    "entity": entity.name,
                    "variable_name": name,
                }),
                0,
            ));
        }

        let mut facts = self.db.get_facts_for_entity(&entity.id)?;
        if let Some(question) = question {
            let words: Vec<String> = question
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| w.len() >= 3)
                .map(ToString::to_string)
                .collect();
            facts.retain(|fact| {
                let name_words = fact.name.to_lowercase();
                words.iter().any(|w| name_words.contains(w))
            });
        }
        let quality = facts.len() as u64;
        Ok(ToolReturn::new(
            json!({
                "entity": entity,
                "facts": facts,
            }),
            quality,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_core::{FactValue, MagicVariable, SourceRef, Subject};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        let var = MagicVariable {
            subject: Some(Subject {
                name: "Artisan AI".into(),
                entity_type: "company".into(),
                canonical_id: None,
            }),
            name: "ceo_name".into(),
            dtype: sleuth_core::Dtype::String,
            value: FactValue::Text("Jaspar Carmichael-Jack".into()),
            confidence: Some(0.9),
            sources: vec![SourceRef::new("https://artisan.co/about")],
            notes: None,
            observed_at: None,
        };
        db.store_fact(&var, None).unwrap();
        db
    }

    #[tokio::test]
    async fn unresolved_entity_returns_code_and_creates_nothing() {
        let db = seeded_db();
        let tool = KnowledgeQueryTool::new(db.clone(), None);
        let ret = tool
            .run(&json!({"entity": "Zzz Unknown"}))
            .await
            .unwrap();
        assert_eq!(ret.payload["code"], "ENTITY_UNRESOLVED");
        assert!(ret.payload["suggestions"].as_array().unwrap().is_empty());
        assert!(db.try_resolve_existing("Zzz Unknown").unwrap().is_none());
    }

    #[tokio::test]
    async fn exact_variable_hit() {
        let tool = KnowledgeQueryTool::new(seeded_db(), None);
        let ret = tool
            .run(&json!({"entity": "artisan ai", "variable_name": "ceo_name"}))
            .await
            .unwrap();
        assert_eq!(ret.payload["name"], "ceo_name");
        assert_eq!(ret.payload["value"], "Jaspar Carmichael-Jack");
        assert_eq!(ret.quality, 1);
    }

    #[tokio::test]
    async fn synonym_fallback_on_miss() {
        let tool = KnowledgeQueryTool::new(seeded_db(), None);
        let ret = tool
            .run(&json!({"entity": "Artisan AI", "variable_name": "ceo"}))
            .await
            .unwrap();
        assert_eq!(ret.payload["requested"], "ceo");
        assert_eq!(ret.payload["matched_names"][0], "ceo_name");
        assert_eq!(ret.payload["facts"][0]["name"], "ceo_name");
    }

    struct RecordingResearcher {
        db: Database,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FactResearcher for RecordingResearcher {
        async fn research_fact(&self, entity: &str, variable_name: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let var = MagicVariable {
                subject: Some(Subject {
                    name: entity.into(),
                    entity_type: "company".into(),
                    canonical_id: None,
                }),
                name: variable_name.into(),
                dtype: sleuth_core::Dtype::Number,
                value: FactValue::Number(40.0),
                confidence: Some(0.6),
                sources: vec![SourceRef::new("https://example.com/about")],
                notes: None,
                observed_at: None,
            };
            self.db.store_fact(&var, None)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn miss_recurses_then_retries() {
        let db = seeded_db();
        let researcher = Arc::new(RecordingResearcher {
            db: db.clone(),
            calls: AtomicUsize::new(0),
        });
        let tool = KnowledgeQueryTool::new(db, Some(researcher.clone()));
        let ret = tool
            .run(&json!({"entity": "Artisan AI", "variable_name": "employee_count"}))
            .await
            .unwrap();
        assert_eq!(researcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ret.payload["name"], "employee_count");
        assert_eq!(ret.payload["value"], 40.0);
    }

    #[tokio::test]
    async fn miss_without_researcher_reports_not_found() {
        let tool = KnowledgeQueryTool::new(seeded_db(), None);
        let ret = tool
            .run(&json!({"entity": "Artisan AI", "variable_name": "employee_count"}))
            .await
            .unwrap();
        assert_eq!(ret.payload["code"], "FACT_NOT_FOUND");
        assert_eq!(ret.quality, 0);
    }

    #[tokio::test]
    async fn question_filters_by_word_overlap() {
        let db = seeded_db();
        let extra = MagicVariable {
            subject: Some(Subject {
                name: "Artisan AI".into(),
                entity_type: "company".into(),
                canonical_id: None,
            }),
            name: "founding_date".into(),
            dtype: sleuth_core::Dtype::Date,
            value: FactValue::Text("2023-04-01".into()),
            confidence: Some(0.7),
            sources: vec![],
            notes: None,
            observed_at: None,
        };
        db.store_fact(&extra, None).unwrap();

        let tool = KnowledgeQueryTool::new(db, None);
        let ret = tool
            .run(&json!({"entity": "Artisan AI", "question": "when was it founded, the founding?"}))
            .await
            .unwrap();
        let facts = ret.payload["facts"].as_array().unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0]["name"], "founding_date");
    }

    #[tokio::test]
    async fn no_question_returns_all_current_facts() {
        let tool = KnowledgeQueryTool::new(seeded_db(), None);
        let ret = tool.run(&json!({"entity": "Artisan AI"})).await.unwrap();
        assert_eq!(ret.payload["entity"]["id"], "cmp_artisan_ai");
        assert_eq!(ret.payload["facts"].as_array().unwrap().len(), 1);
    }
}
