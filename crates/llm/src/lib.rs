//! Chat message model and the OpenAI-compatible reasoner client.
//!
//! The [`Reasoner`] trait is the engine's only view of a language model:
//! a list of [`ChatMessage`]s plus an optional tools array in, a
//! [`ChatResponse`] out. Assistant messages are a tagged variant (plain
//! text or tool requests), and tool-result messages carry the originating
//! call id, which is what makes history trimming testable.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

// ── Chat message types ───────────────────────────────────────────────────────

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Tool calls requested by the assistant (only on assistant messages).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// When role == Tool, identifies which tool call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: Some(content.into()),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: Some(content.into()),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: Some(content.into()),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: vec![],
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Whether this assistant message carries a tool call with the given id.
    pub fn emits_tool_call(&self, id: &str) -> bool {
        self.role == ChatRole::Assistant && self.tool_calls.iter().any(|tc| tc.id == id)
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id for this call, used to correlate tool results. Generated
    /// when the provider omits one.
    #[serde(default)]
    pub id: String,
    /// Always "function" for OpenAI-compatible APIs.
    #[serde(default = "default_tool_call_type", rename = "type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

/// The function name and arguments within a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// Arguments normalised to a parsed JSON object for downstream consumers
    /// (the wire format is a JSON-encoded string).
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Response from a chat call.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Text content of the assistant's response (may be empty when tool
    /// calls are present).
    pub content: String,
    /// Tool calls the assistant wants to make (empty on a normal response).
    pub tool_calls: Vec<ToolCall>,
    /// Finish reason: "stop", "tool_calls", "length", etc.
    pub finish_reason: String,
}

impl ChatResponse {
    /// The assistant message this response corresponds to, for appending to
    /// a conversation history.
    pub fn to_message(&self) -> ChatMessage {
        if self.tool_calls.is_empty() {
            ChatMessage::assistant(self.content.clone())
        } else {
            ChatMessage::assistant_tool_calls(self.tool_calls.clone())
        }
    }
}

// ── Reasoner capability ──────────────────────────────────────────────────────

/// Abstract reasoning model. Implemented by [`OpenAiClient`] in production
/// and by scripted mocks in tests.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// One chat turn: full message list in, assistant response out.
    /// `tools` is an OpenAI-style tools array when tool calling is wanted.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
    ) -> Result<ChatResponse>;
}

// ── OpenAI-compatible client ─────────────────────────────────────────────────

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_retries: usize,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: None,
            max_retries: 2,
        })
    }

    /// Pin the sampling temperature (the inference router runs at 0.0).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat_once(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
    ) -> Result<ChatResponse> {
        let endpoint = format!(
            "{}/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let mut payload = json!({
            "model": self.model,
            "messages": messages_to_openai(messages),
        });
        if let Some(t) = self.temperature {
            payload["temperature"] = json!(t);
        }
        if let Some(tools_val) = tools {
            payload["tools"] = tools_val.clone();
        }

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("send chat request")?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.context("read chat response")?;
        if !status.is_success() {
            return Err(anyhow!("chat API error ({status}): {body}"));
        }
        parse_openai_chat_response(&body)
    }
}

#[async_trait]
impl Reasoner for OpenAiClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
    ) -> Result<ChatResponse> {
        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match self.chat_once(messages, tools).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "chat attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("chat failed with no attempts")))
    }
}

/// Convert a [`ChatMessage`] slice to the OpenAI wire format.
fn messages_to_openai(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            };
            let mut msg = json!({ "role": role });
            match &m.content {
                Some(content) => msg["content"] = json!(content),
                None => msg["content"] = json!(null),
            }
            if !m.tool_calls.is_empty() {
                let calls: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.function.name,
                                // The wire format wants a JSON-encoded string.
                                "arguments": if tc.function.arguments.is_string() {
                                    tc.function.arguments.clone()
                                } else {
                                    json!(tc.function.arguments.to_string())
                                }
                            }
                        })
                    })
                    .collect();
                msg["tool_calls"] = json!(calls);
            }
            if let Some(id) = &m.tool_call_id {
                msg["tool_call_id"] = json!(id);
            }
            msg
        })
        .collect()
}

/// Parse an OpenAI-compatible `/chat/completions` response body.
fn parse_openai_chat_response(body: &serde_json::Value) -> Result<ChatResponse> {
    let choice = body.get("choices").and_then(|c| c.get(0));
    let message = choice.and_then(|c| c.get("message"));

    let content = message
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(|v| v.as_str())
        .unwrap_or("stop")
        .to_string();

    let tool_calls = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, tc)| {
                    let id = tc.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let arguments = func
                        .get("arguments")
                        .map(|v| {
                            if let Some(s) = v.as_str() {
                                serde_json::from_str(s).unwrap_or(json!({}))
                            } else {
                                v.clone()
                            }
                        })
                        .unwrap_or(json!({}));
                    Some(ToolCall {
                        id: if id.is_empty() { format!("call_{i}") } else { id },
                        call_type: "function".to_string(),
                        function: ToolCallFunction { name, arguments },
                    })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
        finish_reason,
    })
}

// ── Structured output extraction ─────────────────────────────────────────────

/// Extract a typed value from an LLM reply that should contain JSON.
///
/// Tries, in order: a fenced ```json block, then the span from the first `{`
/// to the last `}`. Returns `None` when neither parses.
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    if let Some(fence_start) = response.find("```json") {
        let after_fence = &response[fence_start + "```json".len()..];
        if let Some(json_start) = after_fence.find(|c: char| !c.is_whitespace()) {
            let json_body = &after_fence[json_start..];
            if let Some(fence_end) = json_body.find("```") {
                let json_str = json_body[..fence_end].trim();
                if let Ok(val) = serde_json::from_str(json_str) {
                    return Some(val);
                }
            }
        }
    }

    let trimmed = response.trim();
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                if let Ok(val) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(val);
                }
            }
        }
    }

    None
}

/// Coerce a tool call's argument object to a string map, for logging.
pub fn args_to_string_map(args: &serde_json::Value) -> HashMap<String, String> {
    args.as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let s = match v {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Number(n) => n.to_string(),
                        serde_json::Value::Bool(b) => b.to_string(),
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (k.clone(), s)
                })
                .collect()
        })
        .unwrap_or_default()
}

// ── Tests ────────────────────────────────────────────────────────────────────
