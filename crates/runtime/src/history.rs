//! Short-term conversational memory: per-session ordered message logs with
//! bounded retention.
//!
//! The trim invariant: a tool-result message never survives without the
//! assistant message that emitted its tool-call id, because models reject
//! histories with orphaned tool results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sleuth_llm::{ChatMessage, ChatRole};

/// In-process map from session id to its ordered message log. Clone freely;
/// clones share state.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Vec<ChatMessage>>>>,
}

impl SessionStore {
    /// Snapshot of a session's history. Lazily creates an empty history.
    pub fn get(&self, session: &str) -> Vec<ChatMessage> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(session.to_string()).or_default().clone()
    }

    /// Append messages in order.
    pub fn append(&self, session: &str, messages: &[ChatMessage]) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(session.to_string())
            .or_default()
            .extend_from_slice(messages);
    }

    /// Apply the retention window, preserving tool-result pairing.
    pub fn trim(&self, session: &str, window: usize) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(messages) = map.get_mut(session) {
            *messages = trim_messages(messages, window);
        }
    }

    /// Number of messages currently retained for a session.
    pub fn len(&self, session: &str) -> usize {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(session).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, session: &str) -> bool {
        self.len(session) == 0
    }
}

/// Keep the last `window` messages. When the cut lands inside a tool batch
/// (the first kept message is a tool result), walk backwards for the
/// assistant message that emitted the matching tool-call id and prepend it.
pub fn trim_messages(messages: &[ChatMessage], window: usize) -> Vec<ChatMessage> {
    if messages.len() <= window {
        return messages.to_vec();
    }
    let cut = messages.len() - window;
    let mut kept: Vec<ChatMessage> = messages[cut..].to_vec();

    if let Some(first) = kept.first() {
        if first.role == ChatRole::Tool {
            if let Some(call_id) = first.tool_call_id.clone() {
                let emitter = messages[..cut]
                    .iter()
                    .rev()
                    .find(|m| m.emits_tool_call(&call_id));
                if let Some(emitter) = emitter {
                    kept.insert(0, emitter.clone());
                }
            }
        }
    }
    kept
}
