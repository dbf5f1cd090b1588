//! Tool system: trait-based tools with JSON-schema argument validation.
//!
//! Exactly four tools are exposed to the reasoner: `web_search`,
//! `latest_finder`, `knowledge_query`, and `evaluate_plausibility`. Each
//! declares a [`ToolSpec`] that both renders to the OpenAI `tools` array and
//! drives strict argument validation in the [`runtime::ToolRuntime`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod builtins;
pub mod runtime;

pub use builtins::{
    EvaluatePlausibilityTool, FactResearcher, KnowledgeQueryTool, LatestFinderTool,
    WebSearchTool,
};
pub use runtime::{RelevanceFilter, ToolExecution, ToolOutcome, ToolRuntime};

// ── Tool specs ───────────────────────────────────────────────────────────────

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
}

impl Default for ParamType {
    fn default() -> Self {
        Self::String
    }
}

/// Describes a single parameter that a tool accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
    #[serde(default)]
    pub param_type: ParamType,
    /// Allowed values when the parameter is an enum.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    /// Inclusive numeric bounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Minimum string length / array length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Default filled in after validation when the argument is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ToolParam {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            param_type: ParamType::String,
            enum_values: Vec::new(),
            minimum: None,
            maximum: None,
            min_length: None,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }

    pub fn typed(mut self, param_type: ParamType) -> Self {
        self.param_type = param_type;
        self
    }

    pub fn bounded(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(ToString::to_string).collect();
        self
    }
}

/// Static metadata about a tool, used by the model to decide what to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
    /// Whether calls count against the per-run web-search budget.
    #[serde(default)]
    pub counts_against_web_budget: bool,
}

impl ToolSpec {
    /// Render the OpenAI-compatible `tools` array element for this tool.
    pub fn to_openai_tool_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<String> = Vec::new();

        for p in &self.params {
            let type_str = match p.param_type {
                ParamType::String => "string",
                ParamType::Number => "number",
                ParamType::Integer => "integer",
                ParamType::Boolean => "boolean",
                ParamType::Array => "array",
            };
            let mut prop = serde_json::json!({
                "type": type_str,
                "description": p.description,
            });
            if !p.enum_values.is_empty() {
                prop["enum"] = serde_json::json!(p.enum_values);
            }
            if let Some(min) = p.minimum {
                prop["minimum"] = serde_json::json!(min);
            }
            if let Some(max) = p.maximum {
                prop["maximum"] = serde_json::json!(max);
            }
            if p.param_type == ParamType::Array {
                prop["items"] = serde_json::json!({"type": "string"});
            }
            if let Some(default) = &p.default {
                prop["default"] = default.clone();
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(p.name.clone());
            }
        }

        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

/// Convert tool specs into the `tools` JSON array accepted by
/// OpenAI-compatible chat endpoints.
pub fn specs_to_openai_tools(specs: &[ToolSpec]) -> serde_json::Value {
    serde_json::Value::Array(specs.iter().map(|s| s.to_openai_tool_schema()).collect())
}

// ── Tool trait ───────────────────────────────────────────────────────────────

/// The value a tool hands back on success.
#[derive(Debug, Clone)]
pub struct ToolReturn {
    /// JSON payload returned to the model verbatim.
    pub payload: serde_json::Value,
    /// Quality metric for outcome tracking (e.g. result count).
    pub quality: u64,
}

impl ToolReturn {
    pub fn new(payload: serde_json::Value, quality: u64) -> Self {
        Self { payload, quality }
    }
}

/// A tool the reasoner can invoke. Arguments arrive validated against the
/// tool's [`ToolSpec`] with defaults already filled in.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn run(&self, args: &serde_json::Value) -> Result<ToolReturn>;
}

/// Registry of the tools available in one run.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.spec().name == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Canonical JSON encoding with recursively sorted object keys, used for
/// tool-call fingerprints.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let sorted: std::collections::BTreeMap<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), sort(v)))
                    .collect();
                serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

/// Fingerprint of one tool call: name + canonical JSON of its arguments.
pub fn call_fingerprint(name: &str, args: &serde_json::Value) -> String {
    format!("{name}{}", canonical_json(args))
}

// ── Tests ────────────────────────────────────────────────────────────────────
