//! End-to-end research runs against scripted reasoners and a static search
//! backend: the full loop, the citation gate retry path, duplicate blocking,
//! trusted-fact override, and session history bookkeeping.

use std::sync::Arc;

use serde_json::json;

use sleuth_config::AppConfig;
use sleuth_core::{Dtype, FactValue, Intent, ResearchIntensity};
use sleuth_llm::{ChatResponse, ChatRole};
use sleuth_runtime::testing::{
    hit, text_response, tool_call_response, ScriptedReasoner, StaticSearchBackend,
};
use sleuth_runtime::{run_research, ResearchRequest, Services, SessionStore};
use sleuth_store::{Database, TrustedFactUpdate};

fn services(
    primary: Vec<ChatResponse>,
    aux: Vec<String>,
    backend: StaticSearchBackend,
) -> (Services, Arc<ScriptedReasoner>, Arc<StaticSearchBackend>) {
    let primary = Arc::new(ScriptedReasoner::new(primary));
    let backend = Arc::new(backend);
    let services = Services {
        db: Database::open_in_memory().unwrap(),
        reasoner: primary.clone(),
        aux_reasoner: Arc::new(ScriptedReasoner::with_texts(aux)),
        search: backend.clone(),
        history: SessionStore::default(),
        config: AppConfig::default(),
    };
    (services, primary, backend)
}

fn intent_reply(intent: &str, target: &str) -> String {
    format!(r#"{{"intent":"{intent}","target":"{target}"}}"#)
}

const NEUTRAL_ROUTER: &str = r#"{
    "entity_type": "company",
    "attr_constraints": {},
    "vocab_hints": {"boost": [], "penalize": []},
    "evidence_policy": {"min_corroboration": 1, "require_authority": false}
}"#;

// ── S1: boolean query ────────────────────────────────────────────────────────

#[tokio::test]
async fn boolean_query_yields_single_boolean_variable() {
    let final_json = r#"{"intent":"boolean","variables":[
        {"name":"is_profitable","dtype":"boolean","value":false,"confidence":0.7,
         "sources":[{"title":"Report","url":"https://www.reuters.com/openai-finances",
                     "snippet":"OpenAI losses"}]}]}"#;
    let (services, _, backend) = services(
        vec![
            tool_call_response(vec![(
                "web_search",
                json!({"query": "OpenAI profitable 2026", "include_content": false}),
            )]),
            text_response(final_json),
        ],
        vec![intent_reply("boolean", "OpenAI"), NEUTRAL_ROUTER.to_string()],
        StaticSearchBackend::new(vec![hit(
            "https://www.reuters.com/openai-finances",
            "OpenAI finances",
            "OpenAI losses continue",
        )]),
    );

    let result = run_research(&services, ResearchRequest::new("Is OpenAI profitable?"))
        .await
        .unwrap();

    assert_eq!(result.intent, Intent::Boolean);
    assert_eq!(result.variables.len(), 1);
    let var = &result.variables[0];
    assert_eq!(var.name, "is_profitable");
    assert_eq!(var.dtype, Dtype::Boolean);
    assert_eq!(var.value, FactValue::Bool(false));
    assert!(!var.sources.is_empty());
    assert_ne!(var.name, "context", "no context fallback for a direct answer");
    assert_eq!(backend.call_count(), 1);

    // The subject came from the intent target and was resolved on write.
    let subject = var.subject.as_ref().unwrap();
    let id = subject.canonical_id.as_deref().unwrap();
    assert!(services.db.get_fact(id, "is_profitable").unwrap().is_some());
}

// ── S2: trusted-fact override ────────────────────────────────────────────────

#[tokio::test]
async fn trusted_fact_overrides_research_answer() {
    let final_json = r#"{"intent":"specific","variables":[
        {"name":"ceo_name","dtype":"string","value":"Wrong Person","confidence":0.6,
         "sources":[{"url":"https://en.wikipedia.org/wiki/Artisan"},
                    {"url":"https://example.com/profile"}]}]}"#;
    let (services, _, _) = services(
        vec![text_response(final_json)],
        vec![
            intent_reply("specific", "Artisan AI"),
            NEUTRAL_ROUTER.to_string(),
        ],
        StaticSearchBackend::empty(),
    );

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

    let mut request = ResearchRequest::new("Who is the CEO of Artisan AI?");
    request.entity = Some("Artisan AI".into());
    let result = run_research(&services, request).await.unwrap();

    let var = result
        .variables
        .iter()
        .find(|v| v.name == "ceo_name")
        .unwrap();
    assert_eq!(
        var.value,
        FactValue::Text("Jaspar Carmichael-Jack".into())
    );
    assert!(var.confidence.unwrap() >= 0.75);
    assert_eq!(var.sources[0].url, "https://artisan.co/about");
}

// ── S3: duplicate-call blocking ──────────────────────────────────────────────

#[tokio::test]
async fn duplicate_search_is_blocked_and_backend_called_once() {
    let args = json!({"query": "Acme Robotics funding", "include_content": false});
    let final_json = r#"{"intent":"contextual","variables":[]}"#;
    let (services, primary, backend) = services(
        vec![
            tool_call_response(vec![("web_search", args.clone())]),
            tool_call_response(vec![("web_search", args)]),
            text_response(final_json),
        ],
        vec![
            intent_reply("contextual", "Acme Robotics"),
            NEUTRAL_ROUTER.to_string(),
        ],
        StaticSearchBackend::new(vec![hit(
            "https://www.example.com/acme",
            "Acme",
            "Acme Robotics raised",
        )]),
    );

    run_research(&services, ResearchRequest::new("Acme Robotics funding"))
        .await
        .unwrap();

    assert_eq!(backend.call_count(), 1, "second search never reached the backend");

    // The duplicate's tool-result payload is the structured refusal.
    let calls = primary.calls.lock().unwrap();
    let last_messages = calls.last().unwrap();
    let blocked = last_messages
        .iter()
        .filter(|m| m.role == ChatRole::Tool)
        .map(|m| m.content.clone().unwrap_or_default())
        .filter(|c| c.contains("Duplicate tool call blocked"))
        .count();
    assert_eq!(blocked, 1);
}

// ── S5: corroboration retry ──────────────────────────────────────────────────

#[tokio::test]
async fn citation_gate_nudges_then_accepts_corroborated_answer() {
    let weak = r#"{"intent":"specific","variables":[
        {"name":"founding_date","dtype":"date","value":"2023-04-01","confidence":0.8,
         "sources":[{"url":"https://example.com/about"}]}]}"#;
    let strong = r#"{"intent":"specific","variables":[
        {"name":"founding_date","dtype":"date","value":"2023-04-01","confidence":0.8,
         "sources":[{"url":"https://example.com/about"},
                    {"url":"https://www.crunchbase.example/acme"}]}]}"#;
    let (services, primary, _) = services(
        vec![text_response(weak), text_response(strong)],
        vec![intent_reply("specific", "Acme"), NEUTRAL_ROUTER.to_string()],
        StaticSearchBackend::empty(),
    );

    let result = run_research(&services, ResearchRequest::new("When was Acme founded?"))
        .await
        .unwrap();

    let var = &result.variables[0];
    assert_eq!(var.name, "founding_date");
    assert_eq!(var.sources.len(), 2);

    // The retry was driven by a corroboration nudge.
    let calls = primary.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    let nudge = calls[1]
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .and_then(|m| m.content.clone())
        .unwrap();
    assert!(nudge.contains("≥ 2 agreeing sources"), "nudge was: {nudge}");
}

// ── S6: knowledge_query on an unknown entity ─────────────────────────────────

#[tokio::test]
async fn knowledge_query_unresolved_creates_nothing() {
    let final_json = r#"{"intent":"specific","variables":[]}"#;
    let (services, primary, _) = services(
        vec![
            tool_call_response(vec![("knowledge_query", json!({"entity": "Zzz Unknown"}))]),
            text_response(final_json),
        ],
        vec![intent_reply("specific", ""), NEUTRAL_ROUTER.to_string()],
        StaticSearchBackend::empty(),
    );

    run_research(&services, ResearchRequest::new("Something about Zzz Unknown"))
        .await
        .unwrap();

    let calls = primary.calls.lock().unwrap();
    let tool_payload = calls
        .last()
        .unwrap()
        .iter()
        .find(|m| m.role == ChatRole::Tool)
        .and_then(|m| m.content.clone())
        .unwrap();
    assert!(tool_payload.contains("ENTITY_UNRESOLVED"));
    assert!(services.db.try_resolve_existing("Zzz Unknown").unwrap().is_none());
}

// ── Budget exhaustion forces a final answer ──────────────────────────────────

#[tokio::test]
async fn exhausted_budget_forces_tool_free_final_call() {
    let search_call = |i: usize| {
        tool_call_response(vec![(
            "web_search",
            json!({"query": format!("Acme Robotics detail {i}"), "include_content": false}),
        )])
    };
    let final_json = r#"{"intent":"contextual","variables":[]}"#;
    let (services, primary, _) = services(
        vec![
            search_call(1),
            search_call(2),
            search_call(3),
            text_response(final_json),
        ],
        vec![
            intent_reply("contextual", "Acme Robotics"),
            NEUTRAL_ROUTER.to_string(),
        ],
        StaticSearchBackend::new(vec![hit(
            "https://www.example.com/acme",
            "Acme",
            "details",
        )]),
    );

    let mut request = ResearchRequest::new("Tell me about Acme Robotics");
    request.intensity = ResearchIntensity::Low; // 3 steps, 2 web searches
    let result = run_research(&services, request).await.unwrap();

    // Three loop steps + the forced final call.
    let calls = primary.calls.lock().unwrap();
    assert_eq!(calls.len(), 4);
    let stop = calls[3]
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .and_then(|m| m.content.clone())
        .unwrap();
    assert!(stop.contains("Stop using tools"));

    // Empty answer with a known subject synthesises the context fallback.
    assert_eq!(result.variables.len(), 1);
    assert_eq!(result.variables[0].name, "context");
}

// ── Session history bookkeeping ──────────────────────────────────────────────

#[tokio::test]
async fn session_history_records_turn_in_order_and_trims() {
    let final_json = r#"{"intent":"boolean","variables":[
        {"name":"is_public","dtype":"boolean","value":true,"confidence":0.8,
         "sources":[{"url":"https://www.example.com/acme"}]}]}"#;
    let (services, _, _) = services(
        vec![
            tool_call_response(vec![(
                "web_search",
                json!({"query": "Acme Robotics public company", "include_content": false}),
            )]),
            text_response(final_json),
        ],
        vec![
            intent_reply("boolean", "Acme Robotics"),
            NEUTRAL_ROUTER.to_string(),
        ],
        StaticSearchBackend::new(vec![hit(
            "https://www.example.com/acme",
            "Acme",
            "publicly traded",
        )]),
    );

    let mut request = ResearchRequest::new("Is Acme Robotics public?");
    request.session_id = Some("session-1".into());
    run_research(&services, request).await.unwrap();

    let history = services.history.get("session-1");
    assert!(!history.is_empty());
    assert!(history.len() <= services.config.memory.window);

    // No orphaned tool results after the trim.
    for (i, message) in history.iter().enumerate() {
        if message.role == ChatRole::Tool {
            let id = message.tool_call_id.as_deref().unwrap();
            assert!(
                history[..i].iter().any(|m| m.emits_tool_call(id)),
                "orphan tool result at {i}"
            );
        }
    }
}

// ── Forbidden variables are dropped silently ─────────────────────────────────

#[tokio::test]
async fn router_forbidden_variable_never_surfaces() {
    let router_reply = r#"{
        "entity_type": "company",
        "attr_constraints": {"stock_ticker": "forbidden"},
        "vocab_hints": {"boost": [], "penalize": []},
        "evidence_policy": {"min_corroboration": 1, "require_authority": false}
    }"#;
    let final_json = r#"{"intent":"specific","variables":[
        {"name":"ceo_name","dtype":"string","value":"Ada","confidence":0.8,
         "sources":[{"url":"https://a.example/1"},{"url":"https://b.example/2"}]},
        {"name":"stock_ticker","dtype":"string","value":"ACME","confidence":0.9,
         "sources":[{"url":"https://a.example/1"},{"url":"https://b.example/2"}]}]}"#;
    let (services, _, _) = services(
        vec![text_response(final_json)],
        vec![intent_reply("specific", "Acme"), router_reply.to_string()],
        StaticSearchBackend::empty(),
    );

    let result = run_research(&services, ResearchRequest::new("Who runs Acme?"))
        .await
        .unwrap();

    assert_eq!(result.variables.len(), 1);
    assert_eq!(result.variables[0].name, "ceo_name");
    assert!(result.notes.is_none());
}

// ── Unparseable final output degrades gracefully ─────────────────────────────

#[tokio::test]
async fn unparseable_final_answer_returns_note() {
    let (services, _, _) = services(
        vec![text_response("I could not find anything useful, sorry!")],
        vec![intent_reply("specific", ""), NEUTRAL_ROUTER.to_string()],
        StaticSearchBackend::empty(),
    );

    let result = run_research(&services, ResearchRequest::new("Who runs Acme?"))
        .await
        .unwrap();
    assert!(result.variables.is_empty());
    assert!(result.notes.unwrap().contains("no parseable final answer"));
}
