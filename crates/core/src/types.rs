use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Entities and facts ───────────────────────────────────────────────────────

/// A canonical subject in the entity store.
///
/// `id` is deterministic from `(type, canonical_name)` at creation time and is
/// never reassigned; see the resolver for the prefix + slug rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Mapping from namespace (e.g. `"wikidata"`) to a foreign identifier.
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
}

/// Value type tag for a fact or magic variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Boolean,
    String,
    Number,
    Date,
    Url,
    Text,
}

impl Default for Dtype {
    fn default() -> Self {
        Self::Text
    }
}

/// Heterogeneous fact value: a tagged union that flattens to plain JSON.
///
/// Variant order matters for `untagged` deserialization: booleans and numbers
/// must be tried before the string catch-all, and `Json` absorbs everything
/// else (null, arrays, small objects).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Json(serde_json::Value),
}

impl FactValue {
    /// Dtype inferred from the runtime kind of the value.
    pub fn inferred_dtype(&self) -> Dtype {
        match self {
            FactValue::Bool(_) => Dtype::Boolean,
            FactValue::Number(_) => Dtype::Number,
            FactValue::Text(_) => Dtype::String,
            FactValue::Json(_) => Dtype::Text,
        }
    }

    pub fn as_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<serde_json::Value> for FactValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Bool(b) => FactValue::Bool(b),
            serde_json::Value::Number(n) => {
                FactValue::Number(n.as_f64().unwrap_or(0.0))
            }
            serde_json::Value::String(s) => FactValue::Text(s),
            other => FactValue::Json(other),
        }
    }
}

/// One source attribution attached to a fact or variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl SourceRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            title: None,
            url: url.into(),
            snippet: None,
        }
    }
}

/// A bitemporal claim about an entity.
///
/// At most one row per `(entity_id, name)` has `valid_to = None`: the
/// "current" fact. History rows are closed, never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: i64,
    pub entity_id: String,
    pub name: String,
    pub value: FactValue,
    pub dtype: Dtype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
}

// ── Answer units ─────────────────────────────────────────────────────────────

/// The subject a variable is about. `canonical_id` is filled by the finalizer
/// before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    #[serde(rename = "type", default = "default_subject_type")]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<String>,
}

fn default_subject_type() -> String {
    "other".to_string()
}

/// One typed, sourced answer unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagicVariable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,
    pub name: String,
    #[serde(default)]
    pub dtype: Dtype,
    pub value: FactValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

/// Query intent classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Boolean,
    Specific,
    Contextual,
}

impl Default for Intent {
    fn default() -> Self {
        Self::Contextual
    }
}

/// The final answer envelope returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub variables: Vec<MagicVariable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Caller-supplied hint describing an expected variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableHint {
    pub name: String,
    #[serde(rename = "type", default)]
    pub dtype: Dtype,
    #[serde(default)]
    pub description: String,
}

// ── Research intensity ───────────────────────────────────────────────────────

/// Caller-selected budget bucket controlling loop and web-search caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchIntensity {
    Low,
    Medium,
    High,
}

impl Default for ResearchIntensity {
    fn default() -> Self {
        Self::Medium
    }
}

impl ResearchIntensity {
    /// Base `(max_steps, max_web_searches)` for this bucket. Environment
    /// overrides may tighten these but never loosen them.
    pub fn base_caps(self) -> (usize, usize) {
        match self {
            ResearchIntensity::Low => (3, 2),
            ResearchIntensity::Medium => (6, 4),
            ResearchIntensity::High => (10, 8),
        }
    }
}

// ── Inference-router output ──────────────────────────────────────────────────

/// Constraint on a single expected variable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrConstraint {
    Required,
    Allowed,
    Forbidden,
}

/// Controlled vocabulary steering web-search relevance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VocabHints {
    #[serde(default)]
    pub boost: Vec<String>,
    #[serde(default)]
    pub penalize: Vec<String>,
}

/// Evidence requirements the citation gate enforces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePolicy {
    #[serde(default = "default_min_corroboration")]
    pub min_corroboration: u8,
    #[serde(default)]
    pub require_authority: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_days: Option<u32>,
}

fn default_min_corroboration() -> u8 {
    1
}

impl Default for EvidencePolicy {
    fn default() -> Self {
        Self {
            min_corroboration: 1,
            require_authority: false,
            freshness_days: None,
        }
    }
}

/// Structured pre-pass output guiding prompting and citation policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub attr_constraints: BTreeMap<String, AttrConstraint>,
    #[serde(default)]
    pub vocab_hints: VocabHints,
    #[serde(default)]
    pub evidence_policy: EvidencePolicy,
}

impl RouterOutput {
    /// Neutral fallback used when the router model output cannot be parsed.
    pub fn neutral() -> Self {
        Self::default()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
