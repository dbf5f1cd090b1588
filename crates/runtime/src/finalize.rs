//! Finalisation: validate the model's final JSON, attach subjects, overlay
//! trusted facts, and persist what survived.
//!
//! Persistence is best-effort: a storage failure is logged and the response
//! still goes out.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use sleuth_core::{
    dedup_and_rank_sources, AttrConstraint, EnrichmentResult, Fact, Intent, MagicVariable,
    RouterOutput, SourceRef, Subject,
};
use sleuth_llm::extract_json_output;

use crate::services::Services;

/// Placeholder source URL for trusted facts recorded without one.
const TRUSTED_FACT_URL: &str = "about:trusted-fact";
/// Sources carried on a synthesised `context` variable.
const CONTEXT_SOURCE_LIMIT: usize = 5;

pub struct FinalizeInputs<'a> {
    pub intent: Intent,
    pub router: &'a RouterOutput,
    pub default_subject: Option<Subject>,
    pub trusted_facts: &'a [Fact],
    pub final_text: &'a str,
    /// Deduplicated sources gathered from web searches during the run, used
    /// for the `context` fallback variable.
    pub web_sources: &'a [SourceRef],
}

/// Validate and persist the run's final answer.
pub fn finalize_result(services: &Services, inputs: FinalizeInputs<'_>) -> EnrichmentResult {
    let mut result = match extract_json_output::<EnrichmentResult>(inputs.final_text) {
        Some(parsed) => parsed,
        None => {
            debug!("final model output was not valid JSON");
            EnrichmentResult {
                intent: inputs.intent,
                variables: Vec::new(),
                notes: Some("model produced no parseable final answer".to_string()),
            }
        }
    };
    // The classifier's intent is authoritative over whatever the model wrote.
    result.intent = inputs.intent;

    let mut variables = Vec::with_capacity(result.variables.len());
    for mut variable in result.variables {
        if inputs.router.attr_constraints.get(&variable.name)
            == Some(&AttrConstraint::Forbidden)
        {
            continue;
        }

        if variable.subject.is_none() {
            variable.subject = inputs.default_subject.clone();
        }
        let Some(subject) = &mut variable.subject else {
            warn!(variable = %variable.name, "dropping variable without subject");
            continue;
        };

        if subject.canonical_id.is_none() {
            match services
                .db
                .resolve_entity(&subject.name, &subject.entity_type)
            {
                Ok(id) => subject.canonical_id = Some(id),
                Err(e) => {
                    warn!(
                        variable = %variable.name,
                        error = %e,
                        "could not resolve subject entity"
                    );
                }
            }
        }

        variable.confidence = Some(variable.confidence.unwrap_or(0.5).clamp(0.0, 1.0));
        variable.sources = dedup_and_rank_sources(std::mem::take(&mut variable.sources));
        if variable.observed_at.is_none() {
            variable.observed_at = Some(Utc::now());
        }
        variables.push(variable);
    }

    if variables.is_empty() {
        if let Some(subject) = &inputs.default_subject {
            variables.push(context_fallback(services, subject, inputs.web_sources));
        }
    }

    overlay_trusted_facts(&mut variables, inputs.trusted_facts);
    persist_variables(services, &variables);

    EnrichmentResult {
        intent: result.intent,
        variables,
        notes: result.notes,
    }
}

/// When research produced nothing, answer with a single `context` text
/// variable summarising whatever the web searches turned up.
fn context_fallback(
    services: &Services,
    subject: &Subject,
    web_sources: &[SourceRef],
) -> MagicVariable {
    let text = if web_sources.is_empty() {
        format!("No corroborated facts were gathered for {}.", subject.name)
    } else {
        web_sources
            .iter()
            .take(CONTEXT_SOURCE_LIMIT)
            .map(|s| {
                let title = s.title.as_deref().unwrap_or(&s.url);
                match &s.snippet {
                    Some(snippet) => format!("{title}: {snippet}"),
                    None => title.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut subject = subject.clone();
    if subject.canonical_id.is_none() {
        if let Ok(id) = services
            .db
            .resolve_entity(&subject.name, &subject.entity_type)
        {
            subject.canonical_id = Some(id);
        }
    }

    MagicVariable {
        subject: Some(subject),
        name: "context".to_string(),
        dtype: sleuth_core::Dtype::Text,
        value: sleuth_core::FactValue::Text(text),
        confidence: Some(0.3),
        sources: dedup_and_rank_sources(
            web_sources.iter().take(CONTEXT_SOURCE_LIMIT).cloned().collect(),
        ),
        notes: Some("synthesised from gathered web results".to_string()),
        observed_at: Some(Utc::now()),
    }
}

/// Trusted facts win over research output of equal or lower confidence; the
/// trusted source is prepended so callers see where the value came from.
fn overlay_trusted_facts(variables: &mut [MagicVariable], trusted: &[Fact]) {
    if trusted.is_empty() {
        return;
    }
    let by_name: HashMap<&str, &Fact> = trusted.iter().map(|f| (f.name.as_str(), f)).collect();

    for variable in variables.iter_mut() {
        let Some(fact) = by_name.get(variable.name.as_str()) else {
            continue;
        };
        let trusted_confidence = fact.confidence.unwrap_or(0.5);
        let research_confidence = variable.confidence.unwrap_or(0.5);
        if trusted_confidence < research_confidence {
            continue;
        }

        variable.value = fact.value.clone();
        variable.dtype = fact.dtype;
        variable.confidence = Some(trusted_confidence);

        let trusted_source = fact.sources.first().cloned().unwrap_or(SourceRef {
            title: Some("Trusted fact".to_string()),
            url: TRUSTED_FACT_URL.to_string(),
            snippet: None,
        });
        variable.sources.retain(|s| s.url != trusted_source.url);
        variable.sources.insert(0, trusted_source);
    }
}

/// Best-effort persistence of everything except the synthetic `context`
/// variable.
fn persist_variables(services: &Services, variables: &[MagicVariable]) {
    for variable in variables {
        if variable.name == "context" {
            continue;
        }
        let resolved = variable
            .subject
            .as_ref()
            .and_then(|s| s.canonical_id.as_deref())
            .is_some();
        if !resolved {
            continue;
        }
        if let Err(e) = services.db.store_fact(variable, None) {
            warn!(variable = %variable.name, error = %e, "failed to persist fact");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedReasoner, StaticSearchBackend};
    use crate::SessionStore;
    use sleuth_config::AppConfig;
    use sleuth_core::{Dtype, FactValue};
    use sleuth_store::{Database, TrustedFactUpdate};
    use std::sync::Arc;

    fn test_services() -> Services {
        Services {
            db: Database::open_in_memory().unwrap(),
            reasoner: Arc::new(ScriptedReasoner::with_texts(vec![])),
            aux_reasoner: Arc::new(ScriptedReasoner::with_texts(vec![])),
            search: Arc::new(StaticSearchBackend::empty()),
            history: SessionStore::default(),
            config: AppConfig::default(),
        }
    }

    fn inputs<'a>(
        final_text: &'a str,
        subject: Option<Subject>,
        trusted: &'a [Fact],
        router: &'a RouterOutput,
        web: &'a [SourceRef],
    ) -> FinalizeInputs<'a> {
        FinalizeInputs {
            intent: Intent::Specific,
            router,
            default_subject: subject,
            trusted_facts: trusted,
            final_text,
            web_sources: web,
        }
    }

    fn acme_subject() -> Subject {
        Subject {
            name: "Acme".into(),
            entity_type: "company".into(),
            canonical_id: None,
        }
    }

    #[test]
    fn invalid_json_yields_empty_result_with_note_or_context() {
        let services = test_services();
        let router = RouterOutput::neutral();
        let result = finalize_result(
            &services,
            inputs("total garbage", None, &[], &router, &[]),
        );
        assert!(result.variables.is_empty());
        assert!(result.notes.is_some());
    }

    #[test]
    fn subjects_are_resolved_and_persisted() {
        let services = test_services();
        let router = RouterOutput::neutral();
        let text = r#"{"intent":"specific","variables":[
            {"name":"ceo_name","dtype":"string","value":"Ada","confidence":0.9,
             "sources":[{"url":"https://a.example/1"},{"url":"https://b.example/2"}]}]}"#;
        let result = finalize_result(
            &services,
            inputs(text, Some(acme_subject()), &[], &router, &[]),
        );

        let subject = result.variables[0].subject.as_ref().unwrap();
        assert_eq!(subject.canonical_id.as_deref(), Some("cmp_acme"));

        // Persisted as the current fact.
        let fact = services.db.get_fact("cmp_acme", "ceo_name").unwrap().unwrap();
        assert_eq!(fact.value, FactValue::Text("Ada".into()));
    }

    #[test]
    fn confidence_is_clamped_and_defaulted() {
        let services = test_services();
        let router = RouterOutput::neutral();
        let text = r#"{"intent":"specific","variables":[
            {"name":"a","dtype":"text","value":"x","confidence":7.5,
             "sources":[{"url":"https://a.example/1"}]},
            {"name":"b","dtype":"text","value":"y",
             "sources":[{"url":"https://a.example/1"}]}]}"#;
        let result = finalize_result(
            &services,
            inputs(text, Some(acme_subject()), &[], &router, &[]),
        );
        assert_eq!(result.variables[0].confidence, Some(1.0));
        assert_eq!(result.variables[1].confidence, Some(0.5));
    }

    #[test]
    fn sources_are_deduped_and_authority_sorted() {
        let services = test_services();
        let router = RouterOutput::neutral();
        let text = r#"{"intent":"specific","variables":[
            {"name":"hq","dtype":"text","value":"NYC","confidence":0.8,
             "sources":[{"url":"https://example.org/a"},
                        {"url":"https://www.sec.gov/x"},
                        {"url":"https://example.org/a"}]}]}"#;
        let result = finalize_result(
            &services,
            inputs(text, Some(acme_subject()), &[], &router, &[]),
        );
        let sources = &result.variables[0].sources;
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].url, "https://www.sec.gov/x");
    }

    #[test]
    fn zero_variables_synthesise_context_fallback() {
        let services = test_services();
        let router = RouterOutput::neutral();
        let web = vec![SourceRef {
            title: Some("Acme raises round".into()),
            url: "https://news.example/acme".into(),
            snippet: Some("Acme announced a funding round".into()),
        }];
        let result = finalize_result(
            &services,
            inputs(
                r#"{"intent":"contextual","variables":[]}"#,
                Some(acme_subject()),
                &[],
                &router,
                &web,
            ),
        );
        assert_eq!(result.variables.len(), 1);
        let context = &result.variables[0];
        assert_eq!(context.name, "context");
        assert_eq!(context.dtype, Dtype::Text);
        assert!(matches!(
            &context.value,
            FactValue::Text(t) if t.contains("funding round")
        ));
        // The synthetic variable is not persisted.
        assert!(services.db.get_fact("cmp_acme", "context").unwrap().is_none());
    }

    #[test]
    fn trusted_fact_overlays_when_confidence_wins() {
        let services = test_services();
        services.db.resolve_entity("Artisan AI", "company").unwrap();
        services
            .db
            .set_trusted_fact(&TrustedFactUpdate {
                entity: "Artisan AI".into(),
                field: "ceo_name".into(),
                value: FactValue::Text("Jaspar Carmichael-Jack".into()),
                source: Some("https://artisan.co/about".into()),
                updated_by: None,
            })
            .unwrap();
        let trusted = services.db.get_facts_for_entity("cmp_artisan_ai").unwrap();

        let router = RouterOutput::neutral();
        let text = r#"{"intent":"specific","variables":[
            {"name":"ceo_name","dtype":"string","value":"Someone Else","confidence":0.6,
             "sources":[{"url":"https://en.wikipedia.org/wiki/X"},
                        {"url":"https://example.com/b"}]}]}"#;
        let subject = Subject {
            name: "Artisan AI".into(),
            entity_type: "company".into(),
            canonical_id: Some("cmp_artisan_ai".into()),
        };
        let result = finalize_result(
            &services,
            inputs(text, Some(subject), &trusted, &router, &[]),
        );

        let var = &result.variables[0];
        assert_eq!(var.value, FactValue::Text("Jaspar Carmichael-Jack".into()));
        assert_eq!(var.confidence, Some(0.75));
        // Trusted source leads despite lower authority than wikipedia.
        assert_eq!(var.sources[0].url, "https://artisan.co/about");
    }

    #[test]
    fn research_wins_when_more_confident_than_trusted() {
        let services = test_services();
        services.db.resolve_entity("Acme", "company").unwrap();
        // Seed a low-confidence stored fact directly.
        let seeded = MagicVariable {
            subject: Some(Subject {
                name: "Acme".into(),
                entity_type: "company".into(),
                canonical_id: None,
            }),
            name: "hq_city".into(),
            dtype: Dtype::String,
            value: FactValue::Text("Boston".into()),
            confidence: Some(0.4),
            sources: vec![],
            notes: None,
            observed_at: None,
        };
        services.db.store_fact(&seeded, None).unwrap();
        let trusted = services.db.get_facts_for_entity("cmp_acme").unwrap();

        let router = RouterOutput::neutral();
        let text = r#"{"intent":"specific","variables":[
            {"name":"hq_city","dtype":"string","value":"New York","confidence":0.9,
             "sources":[{"url":"https://a.example/1"},{"url":"https://b.example/2"}]}]}"#;
        let result = finalize_result(
            &services,
            inputs(text, Some(acme_subject()), &trusted, &router, &[]),
        );
        assert_eq!(
            result.variables[0].value,
            FactValue::Text("New York".into())
        );
    }

    #[test]
    fn trusted_overlay_without_source_uses_placeholder() {
        let services = test_services();
        services.db.resolve_entity("Acme", "company").unwrap();
        services
            .db
            .set_trusted_fact(&TrustedFactUpdate {
                entity: "Acme".into(),
                field: "hq_city".into(),
                value: FactValue::Text("Chicago".into()),
                source: None,
                updated_by: None,
            })
            .unwrap();
        let trusted = services.db.get_facts_for_entity("cmp_acme").unwrap();

        let router = RouterOutput::neutral();
        let text = r#"{"intent":"specific","variables":[
            {"name":"hq_city","dtype":"string","value":"Boston","confidence":0.5,
             "sources":[{"url":"https://a.example/1"},{"url":"https://b.example/2"}]}]}"#;
        let result = finalize_result(
            &services,
            inputs(text, Some(acme_subject()), &trusted, &router, &[]),
        );
        assert_eq!(result.variables[0].sources[0].url, "about:trusted-fact");
    }
}
