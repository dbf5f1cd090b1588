//! Query intent classification.
//!
//! Primary path is one auxiliary-model call returning strict JSON; the
//! fallback is a leading-interrogative heuristic so classification never
//! fails the run.

use serde::Deserialize;
use tracing::debug;

use sleuth_core::Intent;
use sleuth_llm::{extract_json_output, ChatMessage, Reasoner};

const SYSTEM_PROMPT: &str = "Classify the user's research query. Respond with ONLY a JSON \
object: {\"intent\":\"boolean\"|\"specific\"|\"contextual\",\"target\":\"<noun phrase the \
query is about, if any>\"}. boolean = yes/no question; specific = asks for a concrete \
fact (who/what/when/where/how many); contextual = broad or open-ended. No other text.";

#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: Intent,
    pub target: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    intent: Intent,
    #[serde(default)]
    target: Option<String>,
}

/// Classify a query, falling back to heuristics on any model failure.
pub async fn classify_intent(reasoner: &dyn Reasoner, query: &str) -> IntentResult {
    let messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(query.to_string()),
    ];
    match reasoner.chat(&messages, None).await {
        Ok(response) => {
            if let Some(raw) = extract_json_output::<RawClassification>(&response.content) {
                return IntentResult {
                    intent: raw.intent,
                    target: raw.target.filter(|t| !t.trim().is_empty()),
                };
            }
            debug!("intent classifier returned unparseable output, using heuristic");
            heuristic_intent(query)
        }
        Err(e) => {
            debug!(error = %e, "intent classifier call failed, using heuristic");
            heuristic_intent(query)
        }
    }
}

/// Fallback classification by leading interrogative.
pub fn heuristic_intent(query: &str) -> IntentResult {
    let first_word = query
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();

    let intent = match first_word.as_str() {
        "is" | "are" | "was" | "were" | "does" | "do" | "did" | "can" | "could" | "will"
        | "has" | "have" | "should" => Intent::Boolean,
        "who" | "what" | "when" | "where" | "which" | "how" => Intent::Specific,
        _ => Intent::Contextual,
    };
    IntentResult {
        intent,
        target: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedReasoner;

    #[test]
    fn heuristic_boolean_queries() {
        assert_eq!(heuristic_intent("Is OpenAI profitable?").intent, Intent::Boolean);
        assert_eq!(heuristic_intent("does Acme ship overseas").intent, Intent::Boolean);
    }

    #[test]
    fn heuristic_specific_queries() {
        assert_eq!(
            heuristic_intent("Who is the CEO of Artisan AI?").intent,
            Intent::Specific
        );
        assert_eq!(heuristic_intent("when was Acme founded").intent, Intent::Specific);
    }

    #[test]
    fn heuristic_contextual_fallback() {
        assert_eq!(
            heuristic_intent("Tell me about Acme's business model").intent,
            Intent::Contextual
        );
        assert_eq!(heuristic_intent("").intent, Intent::Contextual);
    }

    #[tokio::test]
    async fn model_classification_wins_when_parseable() {
        let reasoner = ScriptedReasoner::with_texts(vec![
            r#"{"intent":"boolean","target":"OpenAI"}"#.to_string(),
        ]);
        let result = classify_intent(&reasoner, "Is OpenAI profitable?").await;
        assert_eq!(result.intent, Intent::Boolean);
        assert_eq!(result.target.as_deref(), Some("OpenAI"));
    }

    #[tokio::test]
    async fn unparseable_model_output_falls_back() {
        let reasoner =
            ScriptedReasoner::with_texts(vec!["definitely a yes/no question".to_string()]);
        let result = classify_intent(&reasoner, "Is OpenAI profitable?").await;
        assert_eq!(result.intent, Intent::Boolean);
        assert!(result.target.is_none());
    }

    #[tokio::test]
    async fn model_error_falls_back() {
        let reasoner = ScriptedReasoner::failing();
        let result = classify_intent(&reasoner, "Who runs Acme?").await;
        assert_eq!(result.intent, Intent::Specific);
    }
}
