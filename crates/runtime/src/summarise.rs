//! Session summarisation: condense an overlong session history into durable
//! per-user memory bullets.
//!
//! Runs after finalisation and is entirely best-effort: any failure is
//! logged and swallowed.

use serde::Deserialize;
use tracing::debug;

use sleuth_llm::{extract_json_output, ChatMessage, ChatRole, Reasoner};

use crate::services::Services;

const SYSTEM_PROMPT: &str = "You distil chat transcripts into durable facts about the \
user. Respond with ONLY a JSON object {\"facts\":[\"...\"]} containing 3 to 8 short \
bullet statements (each one sentence) capturing stable facts worth remembering about \
the user: who they are, what they work on, their stated preferences. Skip transient \
details. No other text.";

const MAX_BULLETS: usize = 8;
const MIN_BULLET_CHARS: usize = 5;
const MAX_BULLET_CHARS: usize = 300;

#[derive(Debug, Deserialize)]
struct SummaryFacts {
    #[serde(default)]
    facts: Vec<String>,
}

/// Summarise a session into long-term memory when the history has outgrown
/// the retention window. Errors never propagate.
pub async fn summarise_session(services: &Services, session_id: &str, username: &str) {
    let window = services.config.memory.window;
    let history = services.history.get(session_id);
    if history.len() <= window {
        return;
    }

    let transcript = render_transcript(&history);
    let messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(transcript),
    ];

    let response = match services.aux_reasoner.chat(&messages, None).await {
        Ok(response) => response,
        Err(e) => {
            debug!(error = %e, "session summarisation call failed");
            return;
        }
    };

    let Some(parsed) = extract_json_output::<SummaryFacts>(&response.content) else {
        debug!("session summary was not parseable");
        return;
    };

    for bullet in parsed
        .facts
        .iter()
        .map(|b| b.trim())
        .filter(|b| (MIN_BULLET_CHARS..=MAX_BULLET_CHARS).contains(&b.len()))
        .take(MAX_BULLETS)
    {
        if let Err(e) = services
            .db
            .add_memory(username, bullet, &["summary".to_string()])
        {
            debug!(error = %e, "failed to store memory entry");
        }
    }
}

/// Compact transcript for the summariser: roles and trimmed content, tool
/// chatter elided.
fn render_transcript(history: &[ChatMessage]) -> String {
    let mut lines = Vec::new();
    for message in history {
        let role = match message.role {
            ChatRole::System => continue,
            ChatRole::Tool => continue,
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        let Some(content) = &message.content else {
            continue;
        };
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        let excerpt: String = content.chars().take(400).collect();
        lines.push(format!("{role}: {excerpt}"));
    }
    lines.join("\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedReasoner, StaticSearchBackend};
    use crate::SessionStore;
    use sleuth_config::AppConfig;
    use sleuth_store::Database;
    use std::sync::Arc;

    fn services_with_aux(aux: ScriptedReasoner) -> Services {
        Services {
            db: Database::open_in_memory().unwrap(),
            reasoner: Arc::new(ScriptedReasoner::with_texts(vec![])),
            aux_reasoner: Arc::new(aux),
            search: Arc::new(StaticSearchBackend::empty()),
            history: SessionStore::default(),
            config: AppConfig::default(),
        }
    }

    fn fill_history(services: &Services, session: &str, turns: usize) {
        for i in 0..turns {
            services.history.append(
                session,
                &[
                    ChatMessage::user(format!("I work on embedded Rust, question {i}")),
                    ChatMessage::assistant(format!("answer {i}")),
                ],
            );
        }
    }

    #[tokio::test]
    async fn short_history_skips_the_model_entirely() {
        let aux = ScriptedReasoner::with_texts(vec![]);
        let services = services_with_aux(aux);
        services
            .history
            .append("s", &[ChatMessage::user("only message")]);
        summarise_session(&services, "s", "alice").await;
        assert!(services.db.get_memories("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn long_history_is_condensed_into_memory() {
        let aux = ScriptedReasoner::with_texts(vec![
            r#"{"facts":["Works on embedded Rust","Prefers concise answers","ok","x"]}"#
                .to_string(),
        ]);
        let services = services_with_aux(aux);
        fill_history(&services, "s", 6);

        summarise_session(&services, "s", "alice").await;

        let memories = services.db.get_memories("alice").unwrap();
        // "ok" and "x" are below the minimum bullet length.
        assert_eq!(memories.len(), 2);
        assert!(memories.iter().all(|m| m.tags == vec!["summary"]));
    }

    #[tokio::test]
    async fn summariser_errors_are_swallowed() {
        let services = services_with_aux(ScriptedReasoner::failing());
        fill_history(&services, "s", 6);
        summarise_session(&services, "s", "alice").await;
        assert!(services.db.get_memories("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_bullets_stay_unique_per_user() {
        let reply = r#"{"facts":["Works on embedded Rust systems"]}"#;
        let aux =
            ScriptedReasoner::with_texts(vec![reply.to_string(), reply.to_string()]);
        let services = services_with_aux(aux);
        fill_history(&services, "s", 6);

        summarise_session(&services, "s", "alice").await;
        summarise_session(&services, "s", "alice").await;

        assert_eq!(services.db.get_memories("alice").unwrap().len(), 1);
    }
}
