//! Prompt assembly for the research loop.
//!
//! Extracted from the agent so `agent.rs` stays focused on orchestration;
//! this module owns the prompt layout, the tool-use contract, and the final
//! answer schema.

use chrono::Utc;

use sleuth_core::{Fact, ResearchIntensity, RouterOutput, Subject, VariableHint};
use sleuth_tools::ToolSpec;

use crate::intent::IntentResult;

/// All pre-computed data needed to assemble the system prompt.
pub struct SystemPromptInputs<'a> {
    pub intensity: ResearchIntensity,
    pub max_steps: usize,
    pub max_web_searches: usize,
    pub router: &'a RouterOutput,
    pub tool_specs: &'a [ToolSpec],
}

/// Assemble the system message for one research run.
pub fn build_system_prompt(inputs: &SystemPromptInputs<'_>) -> String {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let tools_block = build_tools_block(inputs.tool_specs);
    let policy_block = build_policy_block(inputs.router);
    let vocab_block = build_vocab_block(inputs.router);
    let entity_type_hint = inputs
        .router
        .entity_type
        .as_deref()
        .map(|t| format!("\nThe subject is most likely a {t}."))
        .unwrap_or_default();
    let intensity_nudge = match inputs.intensity {
        ResearchIntensity::Low => {
            "Budget is tight: answer from the fewest searches that satisfy the policy."
        }
        ResearchIntensity::Medium => {
            "Balance thoroughness against budget; avoid redundant searches."
        }
        ResearchIntensity::High => {
            "Be thorough: corroborate from multiple independent sources before answering."
        }
    };

    format!(
        "You are a research agent that answers entity questions with typed, \
         source-attributed variables.\n\
         Current date: {today}.\n\n\
         {tools_block}\n\n\
         RULES:\n\
         - Call tools ONE AT A TIME and wait for each result.\n\
         - Never repeat a tool call with identical arguments; duplicates are blocked.\n\
         - You have at most {max_steps} reasoning steps and {max_web} web searches.\n\
         - {intensity_nudge}\n\
         - Cite every value. Sources must be real URLs you saw in tool results.\n\
         {policy_block}{vocab_block}{entity_type_hint}\n\n\
         When you have enough evidence, respond with ONLY the final JSON object — \
         no prose, no code fences.",
        max_steps = inputs.max_steps,
        max_web = inputs.max_web_searches,
    )
}

fn build_tools_block(specs: &[ToolSpec]) -> String {
    let mut lines = vec!["AVAILABLE TOOLS:".to_string()];
    for spec in specs {
        let params: Vec<String> = spec
            .params
            .iter()
            .map(|p| {
                if p.required {
                    format!("{} (required)", p.name)
                } else {
                    p.name.clone()
                }
            })
            .collect();
        lines.push(format!(
            "  • {}: {} — args: {}",
            spec.name,
            spec.description,
            params.join(", ")
        ));
    }
    lines.join("\n")
}

fn build_policy_block(router: &RouterOutput) -> String {
    let policy = &router.evidence_policy;
    let mut lines = vec![format!(
        "- Every variable needs at least {} source(s); dates, numbers, and short \
         strings need at least 2 agreeing sources.",
        policy.min_corroboration
    )];
    if policy.require_authority {
        lines.push(
            "- At least one source per variable must be authoritative \
             (government, registry, or major outlet)."
                .to_string(),
        );
    }
    if let Some(days) = policy.freshness_days {
        lines.push(format!(
            "- Prefer sources published within the last {days} days."
        ));
    }
    lines.join("\n")
}

fn build_vocab_block(router: &RouterOutput) -> String {
    let hints = &router.vocab_hints;
    let mut out = String::new();
    if !hints.boost.is_empty() {
        out.push_str(&format!(
            "\n- Keep searches close to these terms: {}.",
            hints.boost.join(", ")
        ));
    }
    if !hints.penalize.is_empty() {
        out.push_str(&format!(
            "\n- Avoid drifting toward: {}.",
            hints.penalize.join(", ")
        ));
    }
    out
}

/// The JSON shape the final assistant message must match.
pub const FINAL_SCHEMA: &str = r#"{
  "intent": "boolean" | "specific" | "contextual",
  "variables": [
    {
      "subject": {"name": "...", "type": "company|person|product|place|event|concept|artifact|organization|other"},
      "name": "lower_snake_case_variable",
      "dtype": "boolean|string|number|date|url|text",
      "value": <JSON value matching dtype>,
      "confidence": 0.0-1.0,
      "sources": [{"title": "...", "url": "https://...", "snippet": "..."}]
    }
  ],
  "notes": "optional caveats"
}"#;

/// Inputs for the opening user message.
pub struct IntroInputs<'a> {
    pub query: &'a str,
    pub intent: &'a IntentResult,
    pub expected: &'a [VariableHint],
    pub default_subject: Option<&'a Subject>,
    pub trusted_facts: &'a [Fact],
}

/// Assemble the intro user message: query, target, expected variables,
/// known trusted facts, and the answer schema.
pub fn build_intro_message(inputs: &IntroInputs<'_>) -> String {
    let mut blocks = vec![format!("QUERY: {}", inputs.query)];

    if let Some(target) = &inputs.intent.target {
        blocks.push(format!("TARGET: {target}"));
    }
    if let Some(subject) = inputs.default_subject {
        blocks.push(format!(
            "SUBJECT: {} (type: {})",
            subject.name, subject.entity_type
        ));
    }

    if !inputs.expected.is_empty() {
        let lines: Vec<String> = inputs
            .expected
            .iter()
            .map(|v| {
                let desc = if v.description.is_empty() {
                    String::new()
                } else {
                    format!(" — {}", v.description)
                };
                format!("  • {} ({:?}){desc}", v.name, v.dtype)
            })
            .collect();
        blocks.push(format!("EXPECTED VARIABLES:\n{}", lines.join("\n")));
    }

    if !inputs.trusted_facts.is_empty() {
        let lines: Vec<String> = inputs
            .trusted_facts
            .iter()
            .map(|f| {
                format!(
                    "  • {} = {} (confidence {:.2})",
                    f.name,
                    f.value.as_json(),
                    f.confidence.unwrap_or(0.5)
                )
            })
            .collect();
        blocks.push(format!(
            "KNOWN TRUSTED FACTS (do not contradict without strong evidence):\n{}",
            lines.join("\n")
        ));
    }

    blocks.push(format!(
        "Your final answer must be a single JSON object matching:\n{FINAL_SCHEMA}"
    ));
    blocks.join("\n\n")
}
