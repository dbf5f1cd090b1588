//! Inference-router pre-pass.
//!
//! A low-temperature call on the auxiliary model produces an entity-type
//! guess, per-variable constraints, vocabulary hints, and the evidence
//! policy the citation gate will enforce. Parse failure degrades to the
//! neutral output; the post-pass completes constraints and clamps ranges so
//! downstream code never sees out-of-band values.

use tracing::debug;

use sleuth_core::{AttrConstraint, RouterOutput, VariableHint};
use sleuth_llm::{extract_json_output, ChatMessage, Reasoner};

const SYSTEM_PROMPT: &str = "You are a research pre-pass. Given a query, an optional \
entity hint, and expected variable names, respond with ONLY a JSON object:\n\
{\n\
  \"entity_type\": \"company|person|product|place|event|concept|artifact|organization|other\",\n\
  \"attr_constraints\": {\"<variable_name>\": \"required\"|\"allowed\"|\"forbidden\"},\n\
  \"vocab_hints\": {\"boost\": [\"...\"], \"penalize\": [\"...\"]},\n\
  \"evidence_policy\": {\"min_corroboration\": 1-5, \"require_authority\": bool, \"freshness_days\": int?}\n\
}\n\
Raise min_corroboration for volatile or contested facts; set require_authority for \
financial, legal, or biographical claims; set freshness_days when only recent data is \
useful. boost words help searches stay on topic; penalize words flag likely noise. \
No other text.";

/// Run the router. Never fails: any model or parse error yields the neutral
/// fallback, then the same normalisation applies either way.
pub async fn run_router(
    reasoner: &dyn Reasoner,
    query: &str,
    entity: Option<&str>,
    expected: &[VariableHint],
) -> RouterOutput {
    let mut user = format!("Query: {query}\n");
    if let Some(entity) = entity {
        user.push_str(&format!("Entity hint: {entity}\n"));
    }
    if !expected.is_empty() {
        let names: Vec<&str> = expected.iter().map(|v| v.name.as_str()).collect();
        user.push_str(&format!("Expected variables: {}\n", names.join(", ")));
    }

    let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)];
    let raw = match reasoner.chat(&messages, None).await {
        Ok(response) => extract_json_output::<RouterOutput>(&response.content)
            .unwrap_or_else(|| {
                debug!("router output unparseable, using neutral fallback");
                RouterOutput::neutral()
            }),
        Err(e) => {
            debug!(error = %e, "router call failed, using neutral fallback");
            RouterOutput::neutral()
        }
    };
    normalize_router_output(raw, expected)
}

/// Complete and clamp a raw router output: every expected variable not
/// otherwise marked becomes `allowed`, `min_corroboration` lands in [1, 5],
/// and the entity type is lowercased.
pub fn normalize_router_output(
    mut out: RouterOutput,
    expected: &[VariableHint],
) -> RouterOutput {
    for hint in expected {
        out.attr_constraints
            .entry(hint.name.clone())
            .or_insert(AttrConstraint::Allowed);
    }
    out.evidence_policy.min_corroboration = out.evidence_policy.min_corroboration.clamp(1, 5);
    out.entity_type = out
        .entity_type
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty());
    out.vocab_hints.boost.retain(|s| !s.trim().is_empty());
    out.vocab_hints.penalize.retain(|s| !s.trim().is_empty());
    out
}
