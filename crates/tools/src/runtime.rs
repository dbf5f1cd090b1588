//! Per-run tool execution: argument validation, duplicate blocking, web
//! budget enforcement, and the web-search relevance guard.
//!
//! The registry and cache live for the lifetime of one agent run and are not
//! shared across sessions.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use tracing::{debug, warn};

use crate::{call_fingerprint, ParamType, ToolRegistry, ToolSpec};

/// Queries that are obviously the model echoing a placeholder instead of
/// composing a real search.
const PLACEHOLDER_QUERIES: &[&str] =
    &["input", "query", "search", "pipeline", "title", "url", "link"];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "what", "who", "when", "where",
    "how", "why", "are", "was", "were", "has", "have", "does", "did", "its", "their",
];

/// Outcome of one tool execution, kept for the loop's outcome feedback.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    /// The tool ran and produced a useful payload; `quality` is a tool-chosen
    /// metric such as hit count.
    Success { quality: u64 },
    Failure { reason: String },
}

/// One executed (or refused) tool call.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub name: String,
    /// Payload handed back to the model as the tool-result message.
    pub payload: String,
    pub outcome: ToolOutcome,
}

impl ToolExecution {
    fn failure(name: &str, payload: String, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            payload,
            outcome: ToolOutcome::Failure {
                reason: reason.into(),
            },
        }
    }
}

/// Token vocabulary a proposed web search must overlap with.
#[derive(Debug, Clone, Default)]
pub struct RelevanceFilter {
    vocabulary: HashSet<String>,
}

impl RelevanceFilter {
    /// Build the relevance set from the user query, entity hint, intent
    /// target, expected-variable names, and router boost hints.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocabulary = HashSet::new();
        for part in parts {
            for token in tokenize(part.as_ref()) {
                vocabulary.insert(token);
            }
        }
        Self { vocabulary }
    }

    /// Check a proposed search query. Returns the rejection reason when the
    /// query is a placeholder, has fewer than two informative tokens, or
    /// shares no token with the run's vocabulary.
    pub fn check(&self, query: &str) -> Result<(), String> {
        let normalized = query.trim().to_lowercase();
        if PLACEHOLDER_QUERIES.contains(&normalized.as_str()) {
            return Err(format!("query {query:?} is a placeholder, not a real search"));
        }
        let tokens = tokenize(query);
        if tokens.len() < 2 {
            return Err(format!(
                "query {query:?} has fewer than 2 informative tokens"
            ));
        }
        if !self.vocabulary.is_empty() && !tokens.iter().any(|t| self.vocabulary.contains(t)) {
            return Err(format!(
                "query {query:?} is unrelated to the research subject"
            ));
        }
        Ok(())
    }
}

/// Informative tokens: lowercase alphanumeric words of length ≥ 3 that are
/// not stopwords.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t))
        .map(ToString::to_string)
        .collect()
}

/// Per-run tool executor.
pub struct ToolRuntime {
    registry: ToolRegistry,
    /// Fingerprints of every call attempted this run.
    seen: HashSet<String>,
    /// Fingerprint → first payload, for cache-served repeats.
    cache: HashMap<String, String>,
    web_calls_used: usize,
    max_web_searches: usize,
    relevance: RelevanceFilter,
}

impl ToolRuntime {
    pub fn new(
        registry: ToolRegistry,
        max_web_searches: usize,
        relevance: RelevanceFilter,
    ) -> Self {
        Self {
            registry,
            seen: HashSet::new(),
            cache: HashMap::new(),
            web_calls_used: 0,
            max_web_searches,
            relevance,
        }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.list_specs()
    }

    pub fn web_calls_used(&self) -> usize {
        self.web_calls_used
    }

    /// Execute one tool call from the model. Never returns an error: every
    /// failure mode becomes a structured payload the model can react to.
    pub async fn execute(&mut self, name: &str, args: &serde_json::Value) -> ToolExecution {
        let Some(tool) = self.registry.get(name) else {
            let payload = json!({"error": format!("Unknown tool: {name}")}).to_string();
            return ToolExecution::failure(name, payload, "unknown tool");
        };
        let spec = tool.spec();

        let args = match validate_args(&spec, args) {
            Ok(filled) => filled,
            Err(details) => {
                let payload = json!({
                    "error": "SCHEMA_VALIDATION_ERROR",
                    "details": details,
                })
                .to_string();
                return ToolExecution::failure(name, payload, "schema validation failed");
            }
        };

        let fingerprint = call_fingerprint(name, &args);
        if self.seen.contains(&fingerprint) {
            // Budgeted tools are refused outright so the model varies its
            // queries; the rest are served the cached first payload.
            if spec.counts_against_web_budget {
                let payload = json!({"error": "Duplicate tool call blocked"}).to_string();
                return ToolExecution::failure(name, payload, "duplicate call");
            }
            if let Some(cached) = self.cache.get(&fingerprint) {
                debug!(tool = name, "serving duplicate call from cache");
                return ToolExecution {
                    name: name.to_string(),
                    payload: cached.clone(),
                    outcome: ToolOutcome::Success { quality: 0 },
                };
            }
        }

        if spec.counts_against_web_budget {
            if self.web_calls_used >= self.max_web_searches {
                let payload = json!({"error": "Web search limit reached"}).to_string();
                return ToolExecution::failure(name, payload, "web search limit reached");
            }
            if name == "web_search" {
                let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("");
                if let Err(reason) = self.relevance.check(query) {
                    let payload = json!({"error": format!("Irrelevant search rejected: {reason}")})
                        .to_string();
                    return ToolExecution::failure(name, payload, reason);
                }
            }
        }

        self.seen.insert(fingerprint.clone());

        let execution = match tool.run(&args).await {
            Ok(ret) => {
                let payload = ret.payload.to_string();
                let outcome = if ret.payload.get("error").is_some() {
                    ToolOutcome::Failure {
                        reason: ret.payload["error"]
                            .as_str()
                            .unwrap_or("tool reported an error")
                            .to_string(),
                    }
                } else {
                    ToolOutcome::Success {
                        quality: ret.quality,
                    }
                };
                ToolExecution {
                    name: name.to_string(),
                    payload,
                    outcome,
                }
            }
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                ToolExecution::failure(
                    name,
                    format!("TOOL_EXECUTION_ERROR: {e}"),
                    e.to_string(),
                )
            }
        };

        if spec.counts_against_web_budget {
            self.web_calls_used += 1;
        }
        self.cache.insert(fingerprint, execution.payload.clone());
        execution
    }
}

/// Validate `args` against the spec and fill declared defaults. Returns the
/// completed argument object, or a list of human-readable problems.
pub fn validate_args(
    spec: &ToolSpec,
    args: &serde_json::Value,
) -> Result<serde_json::Value, Vec<String>> {
    let mut problems = Vec::new();
    let Some(given) = args.as_object() else {
        return Err(vec![format!(
            "arguments must be a JSON object, got {args}"
        )]);
    };

    let known: HashSet<&str> = spec.params.iter().map(|p| p.name.as_str()).collect();
    for key in given.keys() {
        if !known.contains(key.as_str()) {
            problems.push(format!("unknown argument {key:?}"));
        }
    }

    let mut filled = given.clone();
    for param in &spec.params {
        let value = given.get(&param.name);
        let Some(value) = value else {
            if param.required {
                problems.push(format!("missing required argument {:?}", param.name));
            } else if let Some(default) = &param.default {
                filled.insert(param.name.clone(), default.clone());
            }
            continue;
        };

        match param.param_type {
            ParamType::String => match value.as_str() {
                None => problems.push(format!("{:?} must be a string", param.name)),
                Some(s) => {
                    if let Some(min_len) = param.min_length {
                        if s.trim().len() < min_len {
                            problems.push(format!(
                                "{:?} must be at least {min_len} characters",
                                param.name
                            ));
                        }
                    }
                    if !param.enum_values.is_empty()
                        && !param.enum_values.iter().any(|v| v == s)
                    {
                        problems.push(format!(
                            "{:?} must be one of {:?}",
                            param.name, param.enum_values
                        ));
                    }
                }
            },
            ParamType::Integer | ParamType::Number => match value.as_f64() {
                None => problems.push(format!("{:?} must be a number", param.name)),
                Some(n) => {
                    if param.param_type == ParamType::Integer && n.fract() != 0.0 {
                        problems.push(format!("{:?} must be an integer", param.name));
                    }
                    if let Some(min) = param.minimum {
                        if n < min {
                            problems.push(format!("{:?} must be ≥ {min}", param.name));
                        }
                    }
                    if let Some(max) = param.maximum {
                        if n > max {
                            problems.push(format!("{:?} must be ≤ {max}", param.name));
                        }
                    }
                }
            },
            ParamType::Boolean => {
                if !value.is_boolean() {
                    problems.push(format!("{:?} must be a boolean", param.name));
                }
            }
            ParamType::Array => match value.as_array() {
                None => problems.push(format!("{:?} must be an array", param.name)),
                Some(items) => {
                    if let Some(min_len) = param.min_length {
                        if items.len() < min_len {
                            problems.push(format!(
                                "{:?} must have at least {min_len} item(s)",
                                param.name
                            ));
                        }
                    }
                    if items.iter().any(|i| !i.is_string()) {
                        problems.push(format!("{:?} items must be strings", param.name));
                    }
                }
            },
        }
    }

    if problems.is_empty() {
        Ok(serde_json::Value::Object(filled))
    } else {
        Err(problems)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
