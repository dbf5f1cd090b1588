//! The bounded reason-act loop (the research agent).
//!
//! One run: classify intent, run the inference-router pre-pass, load trusted
//! facts, then alternate reasoner calls and tool executions under the
//! intensity budget until a candidate answer passes the citation gate, or
//! the budget runs out and the model is forced to answer with what it has.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use sleuth_core::{
    AttrConstraint, EnrichmentResult, Fact, ResearchIntensity, RouterOutput, SourceRef,
    Subject, VariableHint,
};
use sleuth_llm::{extract_json_output, ChatMessage, Reasoner};
use sleuth_search::SearchHit;
use sleuth_tools::{
    specs_to_openai_tools, EvaluatePlausibilityTool, FactResearcher, KnowledgeQueryTool,
    LatestFinderTool, RelevanceFilter, ToolOutcome, ToolRegistry, ToolRuntime, WebSearchTool,
};

use crate::citation::evaluate_citations;
use crate::finalize::{finalize_result, FinalizeInputs};
use crate::intent::{classify_intent, IntentResult};
use crate::prompt::{build_intro_message, build_system_prompt, IntroInputs, SystemPromptInputs};
use crate::router::run_router;
use crate::services::Services;
use crate::summarise::summarise_session;

/// Outcome feedback keeps the model away from repeating failures: the last
/// few successes and failures are replayed after every tool batch.
const OUTCOME_SUCCESSES_SHOWN: usize = 3;
const OUTCOME_FAILURES_SHOWN: usize = 5;

/// One validated enrichment request, as handed over by ingress.
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub query: String,
    pub variables: Vec<VariableHint>,
    pub session_id: Option<String>,
    pub username: Option<String>,
    pub entity: Option<String>,
    pub intensity: ResearchIntensity,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Vec::new(),
            session_id: None,
            username: None,
            entity: None,
            intensity: ResearchIntensity::default(),
        }
    }
}

/// Run one research request end to end.
pub async fn run_research(
    services: &Services,
    request: ResearchRequest,
) -> Result<EnrichmentResult> {
    run_research_at_depth(services, request, 0).await
}

/// Nested research capability handed to `knowledge_query`. The depth bound
/// lives here: a nested run gets `depth + 1`, and past the limit the tool is
/// constructed without recursion at all.
struct NestedResearcher {
    services: Services,
    depth: usize,
}

#[async_trait]
impl FactResearcher for NestedResearcher {
    async fn research_fact(&self, entity: &str, variable_name: &str) -> Result<()> {
        let question = format!(
            "What is the {} of {entity}?",
            variable_name.replace('_', " ")
        );
        let request = ResearchRequest {
            query: question,
            variables: vec![VariableHint {
                name: variable_name.to_string(),
                dtype: sleuth_core::Dtype::Text,
                description: String::new(),
            }],
            session_id: None,
            username: None,
            entity: Some(entity.to_string()),
            intensity: ResearchIntensity::Low,
        };
        run_research_at_depth(&self.services, request, self.depth + 1).await?;
        Ok(())
    }
}

pub(crate) async fn run_research_at_depth(
    services: &Services,
    request: ResearchRequest,
    depth: usize,
) -> Result<EnrichmentResult> {
    let aux = services.aux_reasoner.as_ref();
    let intent = classify_intent(aux, &request.query).await;
    let router = run_router(
        aux,
        &request.query,
        request.entity.as_deref(),
        &request.variables,
    )
    .await;

    let (default_subject, trusted_facts) = resolve_default_subject(services, &request, &intent, &router)?;

    let (max_steps, max_web) = services
        .config
        .research
        .effective_caps(request.intensity.base_caps());

    let mut runtime = build_tool_runtime(services, &request, &intent, &router, max_web, depth);
    let tools_json = specs_to_openai_tools(&runtime.specs());

    let system_prompt = build_system_prompt(&SystemPromptInputs {
        intensity: request.intensity,
        max_steps,
        max_web_searches: max_web,
        router: &router,
        tool_specs: &runtime.specs(),
    });
    let intro = build_intro_message(&IntroInputs {
        query: &request.query,
        intent: &intent,
        expected: &request.variables,
        default_subject: default_subject.as_ref(),
        trusted_facts: &trusted_facts,
    });

    let mut messages = vec![ChatMessage::system(system_prompt)];
    if let Some(session_id) = &request.session_id {
        messages.extend(services.history.get(session_id));
    }
    messages.push(ChatMessage::user(intro));
    // Everything from the intro onward is this turn's contribution to the
    // session history.
    let turn_start = messages.len() - 1;

    info!(
        query = %request.query,
        depth,
        max_steps,
        max_web,
        intent = ?intent.intent,
        "starting research run"
    );

    let mut final_text: Option<String> = None;
    let mut outcomes: Vec<(String, ToolOutcome)> = Vec::new();
    let mut web_sources: Vec<SourceRef> = Vec::new();

    for step in 0..max_steps {
        debug!(step, messages = messages.len(), "agent loop step");
        let response = services.reasoner.chat(&messages, Some(&tools_json)).await?;
        messages.push(response.to_message());

        if response.tool_calls.is_empty() {
            match handle_candidate(
                &response.content,
                &router,
                default_subject.as_ref(),
                step + 1 < max_steps,
            ) {
                CandidateVerdict::Accept(text) => {
                    final_text = Some(text);
                    break;
                }
                CandidateVerdict::Nudge(nudge) => {
                    messages.push(ChatMessage::user(nudge));
                    continue;
                }
            }
        }

        // Tool calls execute strictly in order; the reasoner is prompted to
        // emit them sequentially and results feed the next step.
        for call in &response.tool_calls {
            debug!(
                tool = %call.function.name,
                args = ?sleuth_llm::args_to_string_map(&call.function.arguments),
                "executing tool call"
            );
            let execution = runtime
                .execute(&call.function.name, &call.function.arguments)
                .await;
            if execution.name == "web_search" {
                collect_web_sources(&execution.payload, &mut web_sources);
            }
            messages.push(ChatMessage::tool_result(&call.id, &execution.payload));
            outcomes.push((execution.name.clone(), execution.outcome.clone()));
        }

        if !outcomes.is_empty() {
            messages.push(ChatMessage::user(build_outcomes_message(&outcomes)));
        }
    }

    let final_text = match final_text {
        Some(text) => text,
        None => {
            // Budget exhausted: one last call with tools withheld.
            messages.push(ChatMessage::user(
                "Stop using tools. Produce ONLY the final JSON object now, with the \
                 best answer supported by the evidence you already have.",
            ));
            let response = services.reasoner.chat(&messages, None).await?;
            messages.push(ChatMessage::assistant(response.content.clone()));
            response.content
        }
    };

    let result = finalize_result(
        services,
        FinalizeInputs {
            intent: intent.intent,
            router: &router,
            default_subject: default_subject.clone(),
            trusted_facts: &trusted_facts,
            final_text: &final_text,
            web_sources: &web_sources,
        },
    );

    if let Some(session_id) = &request.session_id {
        services.history.append(session_id, &messages[turn_start..]);
        if let Some(username) = &request.username {
            summarise_session(services, session_id, username).await;
        }
        services.history.trim(session_id, services.config.memory.window);
    }

    Ok(result)
}

// ── setup helpers ────────────────────────────────────────────────────────────

/// Resolve the run's default subject from the entity hint (or intent target)
/// and load its trusted facts. Lookup only; entities are created at
/// finalisation, not here.
fn resolve_default_subject(
    services: &Services,
    request: &ResearchRequest,
    intent: &IntentResult,
    router: &RouterOutput,
) -> Result<(Option<Subject>, Vec<Fact>)> {
    let name = request
        .entity
        .clone()
        .or_else(|| intent.target.clone());
    let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
        return Ok((None, Vec::new()));
    };

    if let Some(resolved) = services.db.try_resolve_existing(&name)? {
        let trusted = services.db.get_facts_for_entity(&resolved.id)?;
        let subject = Subject {
            name: resolved.name,
            entity_type: resolved.entity_type,
            canonical_id: Some(resolved.id),
        };
        return Ok((Some(subject), trusted));
    }

    let subject = Subject {
        name,
        entity_type: router
            .entity_type
            .clone()
            .unwrap_or_else(|| "other".to_string()),
        canonical_id: None,
    };
    Ok((Some(subject), Vec::new()))
}

fn build_tool_runtime(
    services: &Services,
    request: &ResearchRequest,
    intent: &IntentResult,
    router: &RouterOutput,
    max_web: usize,
    depth: usize,
) -> ToolRuntime {
    let mut registry = ToolRegistry::default();
    registry.register(Box::new(WebSearchTool::new(
        services.search.clone(),
        services.fetch_timeout(),
    )));
    registry.register(Box::new(LatestFinderTool::new(
        services.search.clone(),
        services.fetch_timeout(),
    )));

    let researcher: Option<Arc<dyn FactResearcher>> =
        if depth < services.config.research.max_recursion_depth {
            Some(Arc::new(NestedResearcher {
                services: services.clone(),
                depth,
            }))
        } else {
            None
        };
    registry.register(Box::new(KnowledgeQueryTool::new(
        services.db.clone(),
        researcher,
    )));
    registry.register(Box::new(EvaluatePlausibilityTool::new(
        services.aux_reasoner.clone(),
    )));

    let mut vocab_parts: Vec<String> = vec![request.query.clone()];
    if let Some(entity) = &request.entity {
        vocab_parts.push(entity.clone());
    }
    if let Some(target) = &intent.target {
        vocab_parts.push(target.clone());
    }
    for hint in &request.variables {
        vocab_parts.push(hint.name.clone());
    }
    vocab_parts.extend(router.vocab_hints.boost.iter().cloned());

    ToolRuntime::new(registry, max_web, RelevanceFilter::new(vocab_parts))
}

// ── candidate handling ───────────────────────────────────────────────────────

enum CandidateVerdict {
    Accept(String),
    Nudge(String),
}

/// Validate a zero-tool-call assistant message as the candidate final answer.
fn handle_candidate(
    content: &str,
    router: &RouterOutput,
    default_subject: Option<&Subject>,
    steps_remain: bool,
) -> CandidateVerdict {
    let Some(mut candidate) = extract_json_output::<EnrichmentResult>(content) else {
        // Unparseable: the finalizer substitutes an empty result with a note,
        // and the citation gate is bypassed.
        return CandidateVerdict::Accept(content.to_string());
    };

    for variable in &mut candidate.variables {
        if variable.subject.is_none() {
            variable.subject = default_subject.cloned();
        }
    }
    // Names the router marked forbidden are dropped silently.
    candidate.variables.retain(|v| {
        router.attr_constraints.get(&v.name) != Some(&AttrConstraint::Forbidden)
    });

    if candidate.variables.iter().any(|v| v.subject.is_none()) {
        if steps_remain {
            return CandidateVerdict::Nudge(
                "Every variable must carry a subject {\"name\", \"type\"}. Re-emit the \
                 final JSON with a subject on each variable."
                    .to_string(),
            );
        }
        return CandidateVerdict::Accept(
            serde_json::to_string(&candidate).unwrap_or_else(|_| content.to_string()),
        );
    }

    let report = evaluate_citations(&candidate.variables, &router.evidence_policy);
    if !report.ok && steps_remain {
        return CandidateVerdict::Nudge(format!(
            "The answer does not meet the citation policy:\n- {}\nRun more searches to \
             corroborate, then re-emit ONLY the final JSON.",
            report.issues.join("\n- ")
        ));
    }
    if !report.ok {
        warn!(issues = ?report.issues, "accepting final answer despite citation issues");
    }

    CandidateVerdict::Accept(
        serde_json::to_string(&candidate).unwrap_or_else(|_| content.to_string()),
    )
}

// ── tool-batch helpers ───────────────────────────────────────────────────────

fn collect_web_sources(payload: &str, into: &mut Vec<SourceRef>) {
    let Ok(hits) = serde_json::from_str::<Vec<SearchHit>>(payload) else {
        return;
    };
    for hit in hits {
        if into.iter().any(|s| s.url == hit.url) {
            continue;
        }
        into.push(SourceRef {
            title: hit.title.clone(),
            url: hit.url.clone(),
            snippet: hit.snippet_or_content().map(|s| s.chars().take(300).collect()),
        });
    }
}

/// Summarise recent tool outcomes for the model: the last few successes to
/// imitate and failures to avoid.
fn build_outcomes_message(outcomes: &[(String, ToolOutcome)]) -> String {
    let successes: Vec<serde_json::Value> = outcomes
        .iter()
        .filter_map(|(name, outcome)| match outcome {
            ToolOutcome::Success { quality } => Some(json!({
                "tool": name,
                "quality": quality,
            })),
            ToolOutcome::Failure { .. } => None,
        })
        .collect();
    let failures: Vec<serde_json::Value> = outcomes
        .iter()
        .filter_map(|(name, outcome)| match outcome {
            ToolOutcome::Failure { reason } => Some(json!({
                "tool": name,
                "reason": reason,
            })),
            ToolOutcome::Success { .. } => None,
        })
        .collect();

    let summary = json!({
        "tool_outcomes": {
            "recent_successes": successes
                .iter()
                .rev()
                .take(OUTCOME_SUCCESSES_SHOWN)
                .rev()
                .collect::<Vec<_>>(),
            "recent_failures": failures
                .iter()
                .rev()
                .take(OUTCOME_FAILURES_SHOWN)
                .rev()
                .collect::<Vec<_>>(),
        }
    });
    format!(
        "{summary}\nDo not repeat calls that failed. Prefer new calls shaped like the \
         recent successes."
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────
