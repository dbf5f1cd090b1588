//! Scripted fakes for exercising the orchestrator without real providers.
//!
//! Only compiled for the crate's own tests or under the `testing` feature;
//! release builds of the library carry none of this.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use sleuth_llm::{ChatMessage, ChatResponse, Reasoner, ToolCall, ToolCallFunction};
use sleuth_search::{SearchBackend, SearchHit, SearchQuery};

/// A reasoner that replays a fixed sequence of responses and keeps the
/// message lists it was called with.
pub struct ScriptedReasoner {
    responses: Mutex<VecDeque<ChatResponse>>,
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
    fail: bool,
}

impl ScriptedReasoner {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Convenience: plain-text responses only.
    pub fn with_texts(texts: Vec<String>) -> Self {
        Self::new(texts.into_iter().map(text_response).collect())
    }

    /// A reasoner whose every call errors.
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: Option<&serde_json::Value>,
    ) -> Result<ChatResponse> {
        if self.fail {
            bail!("scripted failure");
        }
        self.calls.lock().unwrap().push(messages.to_vec());
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => Ok(response),
            None => bail!("scripted reasoner ran out of responses"),
        }
    }
}

/// Build a plain-text assistant response.
pub fn text_response(content: impl Into<String>) -> ChatResponse {
    ChatResponse {
        content: content.into(),
        tool_calls: vec![],
        finish_reason: "stop".to_string(),
    }
}

/// Build a tool-call response with generated call ids.
pub fn tool_call_response(calls: Vec<(&str, serde_json::Value)>) -> ChatResponse {
    let tool_calls = calls
        .into_iter()
        .enumerate()
        .map(|(i, (name, args))| ToolCall {
            id: format!("call_{i}"),
            call_type: "function".to_string(),
            function: ToolCallFunction {
                name: name.to_string(),
                arguments: args,
            },
        })
        .collect();
    ChatResponse {
        content: String::new(),
        tool_calls,
        finish_reason: "tool_calls".to_string(),
    }
}

/// A search backend returning the same hits for every query, with a call
/// counter for duplicate-blocking assertions.
pub struct StaticSearchBackend {
    hits: Vec<SearchHit>,
    pub calls: Mutex<Vec<String>>,
}

impl StaticSearchBackend {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SearchBackend for StaticSearchBackend {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.calls.lock().unwrap().push(query.query.clone());
        Ok(self.hits.clone())
    }
}

/// A hit pointing at a reasonably authoritative host.
pub fn hit(url: &str, title: &str, snippet: &str) -> SearchHit {
    SearchHit {
        title: Some(title.to_string()),
        url: url.to_string(),
        snippet: Some(snippet.to_string()),
        content: None,
    }
}
