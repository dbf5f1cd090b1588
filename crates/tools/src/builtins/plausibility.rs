//! `evaluate_plausibility` — model-based adjudication of conflicting claims.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use sleuth_llm::{extract_json_output, ChatMessage, Reasoner};

use crate::{ParamType, Tool, ToolParam, ToolReturn, ToolSpec};

const SYSTEM_PROMPT: &str = "You are a careful fact-checking assistant. For each claim, \
judge whether it is plausible given general knowledge and the provided context. \
Respond with ONLY a JSON object of the form \
{\"evaluations\":[{\"claim\":\"...\",\"plausible\":true,\"confidence\":0.0,\"reasoning\":\"...\"}]} \
with one entry per claim, in order. confidence is in [0,1]. No other text.";

#[derive(Debug, Deserialize)]
struct Evaluations {
    evaluations: Vec<Evaluation>,
}

#[derive(Debug, Deserialize)]
struct Evaluation {
    claim: String,
    plausible: bool,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

fn default_confidence() -> f64 {
    0.5
}

pub struct EvaluatePlausibilityTool {
    reasoner: Arc<dyn Reasoner>,
}

impl EvaluatePlausibilityTool {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }
}

#[async_trait]
impl Tool for EvaluatePlausibilityTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "evaluate_plausibility".to_string(),
            description: "Judge whether claims are plausible, with confidence and \
                reasoning per claim. Use it to adjudicate between conflicting search \
                results before answering."
                .to_string(),
            params: vec![
                ToolParam::required("claims", "Claims to evaluate")
                    .typed(ParamType::Array)
                    .min_length(1),
                ToolParam::optional("context", "Additional context for the evaluation"),
            ],
            counts_against_web_budget: false,
        }
    }

    async fn run(&self, args: &serde_json::Value) -> Result<ToolReturn> {
        let claims: Vec<String> = args["claims"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let context = args["context"].as_str().unwrap_or("");

        let mut user = String::from("Claims:\n");
        for (i, claim) in claims.iter().enumerate() {
            user.push_str(&format!("{}. {claim}\n", i + 1));
        }
        if !context.is_empty() {
            user.push_str(&format!("\nContext:\n{context}\n"));
        }

        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)];
        let response = self.reasoner.chat(&messages, None).await?;

        let Some(parsed) = extract_json_output::<Evaluations>(&response.content) else {
            return Ok(ToolReturn::new(
                json!({"error": "could not parse plausibility response"}),
                0,
            ));
        };

        let evaluations: Vec<serde_json::Value> = parsed
            .evaluations
            .into_iter()
            .map(|e| {
                json!({
                    "claim": e.claim,
                    "plausible": e.plausible,
                    "confidence": e.confidence.clamp(0.0, 1.0),
                    "reasoning": e.reasoning,
                })
            })
            .collect();
        let quality = evaluations.len() as u64;
        Ok(ToolReturn::new(json!({"evaluations": evaluations}), quality))
    }
}
